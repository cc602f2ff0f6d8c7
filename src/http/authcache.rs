//! Credential cache for server and proxy authentication.
//!
//! Entries are grouped by a protection-space key
//! (`kind:scheme:protocol:host:port[:realm]`). Within a key, entries are
//! disambiguated by path: a later entry whose path is a prefix of an
//! earlier one supersedes it, and lookups take the first entry whose path
//! prefixes the request path.
//!
//! [`RealmRequests`] serializes concurrent challenge handling per realm so
//! two requests hitting the same protected resource do not both prompt.

use crate::http::authentry::CredentialEntry;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// Authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// Base64 `user:password`.
    Basic,
    /// Challenge/response hash (RFC 2617 / 7616).
    Digest,
    /// NTLM via an external security context.
    Ntlm,
    /// Kerberos via an external security context.
    Kerberos,
    /// SPNEGO via an external security context.
    Negotiate,
}

impl AuthScheme {
    /// Case-insensitive scheme lookup by challenge name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "digest" => Some(Self::Digest),
            "ntlm" => Some(Self::Ntlm),
            "kerberos" => Some(Self::Kerberos),
            "negotiate" => Some(Self::Negotiate),
            _ => None,
        }
    }

    /// Name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Digest => "Digest",
            Self::Ntlm => "NTLM",
            Self::Kerberos => "Kerberos",
            Self::Negotiate => "Negotiate",
        }
    }

    /// Schemes that need a second round trip on the same connection.
    pub fn is_two_stage(&self) -> bool {
        matches!(self, Self::Ntlm | Self::Kerberos | Self::Negotiate)
    }

    /// Schemes that may be sent before any challenge.
    pub fn supports_preemptive(&self) -> bool {
        matches!(self, Self::Basic | Self::Digest)
    }

    fn key_tag(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Digest => "digest",
            Self::Ntlm => "ntlm",
            Self::Kerberos => "kerberos",
            Self::Negotiate => "negotiate",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether credentials answer an origin server or a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthTarget {
    Server,
    Proxy,
}

impl AuthTarget {
    fn key_tag(&self) -> &'static str {
        match self {
            Self::Server => "s",
            Self::Proxy => "p",
        }
    }
}

/// Protection-space lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(
        target: AuthTarget,
        scheme: AuthScheme,
        protocol: &str,
        host: &str,
        port: u16,
        realm: Option<&str>,
    ) -> Self {
        let mut key = format!(
            "{}:{}:{}:{}:{}",
            target.key_tag(),
            scheme.key_tag(),
            protocol.to_ascii_lowercase(),
            host.to_ascii_lowercase(),
            port
        );
        if let Some(realm) = realm {
            key.push(':');
            key.push_str(realm);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Thread-safe credential store shared by every session of a context.
pub struct CredentialCache {
    entries: Mutex<HashMap<CacheKey, Vec<CredentialEntry>>>,
    requests: Arc<RealmRequests>,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("entries", &self.len())
            .field("serialized", &self.requests.is_enabled())
            .finish()
    }
}

impl CredentialCache {
    /// Create an empty cache without per-realm serialization.
    pub fn new() -> Self {
        Self::with_serialization(false)
    }

    /// Create an empty cache, optionally serializing challenge handling per realm.
    pub fn with_serialization(enabled: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            requests: Arc::new(RealmRequests::new(enabled)),
        }
    }

    /// Store `entry` under `key`, evicting entries it subsumes.
    ///
    /// An existing entry is evicted when it has no path or when its path
    /// extends the new entry's path. A pathless new entry evicts everything.
    pub fn put(&self, key: &CacheKey, entry: CredentialEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let list = entries.entry(key.clone()).or_default();
        let before = list.len();
        match entry.path() {
            Some(new_path) => list.retain(|e| match e.path() {
                Some(existing) => !existing.starts_with(new_path),
                None => false,
            }),
            None => list.clear(),
        }
        tracing::debug!(
            key = %key,
            path = ?entry.path(),
            evicted = before - list.len(),
            "Caching credentials"
        );
        list.push(entry);
    }

    /// Look up credentials for `key`.
    ///
    /// With a request path, returns the first entry whose path prefixes it
    /// (pathless entries match anything). Without one, returns the most
    /// recently stored entry.
    pub fn get(&self, key: &CacheKey, request_path: Option<&str>) -> Option<CredentialEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let list = entries.get(key)?;
        match request_path {
            Some(path) => list
                .iter()
                .find(|e| e.path().map_or(true, |p| path.starts_with(p)))
                .cloned(),
            None => list.last().cloned(),
        }
    }

    /// Remove one entry (matched by identity) or, with `None`, every entry under `key`.
    pub fn remove(&self, key: &CacheKey, entry: Option<&CredentialEntry>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entry {
            Some(target) => {
                if let Some(list) = entries.get_mut(key) {
                    list.retain(|e| e.id() != target.id());
                    if list.is_empty() {
                        entries.remove(key);
                    }
                }
            }
            None => {
                entries.remove(key);
            }
        }
        tracing::trace!(key = %key, "Removed cached credentials");
    }

    /// Cache under the realm key, plus the realm-less key when the scheme is preemptive.
    pub fn add_to_cache(&self, entry: &CredentialEntry) {
        self.put(&entry.cache_key(true), entry.clone());
        if entry.supports_preemptive() {
            self.put(&entry.cache_key(false), entry.clone());
        }
    }

    /// Remove `entry` from both of its keys.
    pub fn remove_from_cache(&self, entry: &CredentialEntry) {
        self.remove(&entry.cache_key(true), Some(entry));
        if entry.supports_preemptive() {
            self.remove(&entry.cache_key(false), Some(entry));
        }
    }

    /// Find credentials usable before any challenge. Digest wins over Basic.
    pub fn lookup_preemptive(
        &self,
        target: AuthTarget,
        protocol: &str,
        host: &str,
        port: u16,
        path: Option<&str>,
    ) -> Option<CredentialEntry> {
        [AuthScheme::Digest, AuthScheme::Basic]
            .iter()
            .find_map(|scheme| {
                let key = CacheKey::new(target, *scheme, protocol, host, port, None);
                self.get(&key, path)
            })
    }

    /// Per-realm in-flight tracking shared with sessions.
    pub fn realm_requests(&self) -> &Arc<RealmRequests> {
        &self.requests
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Total number of entries across all keys.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of [`RealmRequests::acquire`].
#[derive(Debug)]
pub enum RealmSlot {
    /// Serialization is disabled.
    Unserialized,
    /// The caller now owns the realm until the guard drops.
    Owner(RealmGuard),
    /// The caller already owned the realm.
    Reentrant,
    /// Another owner finished; the caller should re-check the cache and try again.
    Waited,
}

/// Tracks which session is currently resolving credentials for each realm key.
#[derive(Debug)]
pub struct RealmRequests {
    enabled: bool,
    owners: Mutex<HashMap<String, u64>>,
    released: Notify,
}

impl RealmRequests {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            owners: Mutex::new(HashMap::new()),
            released: Notify::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Claim `key` for `owner`, waiting while another owner holds it.
    pub async fn acquire(self: &Arc<Self>, key: &CacheKey, owner: u64) -> RealmSlot {
        if !self.enabled {
            return RealmSlot::Unserialized;
        }

        let notified = self.released.notified();
        tokio::pin!(notified);
        // Register interest before inspecting state so a release in between is not lost.
        notified.as_mut().enable();

        {
            let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
            match owners.get(key.as_str()) {
                None => {
                    owners.insert(key.as_str().to_string(), owner);
                    return RealmSlot::Owner(RealmGuard {
                        requests: Arc::clone(self),
                        key: key.as_str().to_string(),
                        owner,
                    });
                }
                Some(current) if *current == owner => return RealmSlot::Reentrant,
                Some(_) => {}
            }
        }

        tracing::debug!(key = %key, owner, "Waiting for in-flight auth on realm");
        loop {
            notified.as_mut().await;
            if self.owner_of(key).is_none() {
                return RealmSlot::Waited;
            }
            notified.set(self.released.notified());
            notified.as_mut().enable();
            if self.owner_of(key).is_none() {
                return RealmSlot::Waited;
            }
        }
    }

    /// Current owner of `key`, if any.
    pub fn owner_of(&self, key: &CacheKey) -> Option<u64> {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key.as_str())
            .copied()
    }

    fn release(&self, key: &str, owner: u64) {
        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        if owners.get(key) == Some(&owner) {
            owners.remove(key);
            drop(owners);
            tracing::trace!(key, owner, "Released realm");
            self.released.notify_waiters();
        }
    }
}

/// Ownership of a realm key; releasing wakes every waiter.
pub struct RealmGuard {
    requests: Arc<RealmRequests>,
    key: String,
    owner: u64,
}

impl RealmGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for RealmGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealmGuard")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .finish()
    }
}

impl Drop for RealmGuard {
    fn drop(&mut self) {
        self.requests.release(&self.key, self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::authentry::{Credentials, CredentialEntry, ProtectionSpace};
    use std::time::Duration;

    fn basic(path: Option<&str>, user: &str) -> CredentialEntry {
        let space = ProtectionSpace::new(AuthTarget::Server, "http", "example.com", 80, "r");
        CredentialEntry::basic(space, path.map(String::from), Credentials::new(user, "pw"))
    }

    fn key() -> CacheKey {
        CacheKey::new(AuthTarget::Server, AuthScheme::Basic, "http", "example.com", 80, Some("r"))
    }

    #[test]
    fn test_key_format() {
        let k = CacheKey::new(AuthTarget::Proxy, AuthScheme::Digest, "HTTP", "Proxy.COM", 3128, Some("R"));
        assert_eq!(k.as_str(), "p:digest:http:proxy.com:3128:R");
        let k = CacheKey::new(AuthTarget::Server, AuthScheme::Basic, "https", "a.com", 443, None);
        assert_eq!(k.as_str(), "s:basic:https:a.com:443");
    }

    #[test]
    fn test_shorter_path_subsumes_longer() {
        let cache = CredentialCache::new();
        cache.put(&key(), basic(Some("/a/b/"), "deep"));
        cache.put(&key(), basic(Some("/a/"), "shallow"));

        assert_eq!(cache.len(), 1);
        let found = cache.get(&key(), Some("/a/b/c")).unwrap();
        assert_eq!(found.path(), Some("/a/"));
    }

    #[test]
    fn test_lookup_takes_first_prefix_match() {
        let cache = CredentialCache::new();
        cache.put(&key(), basic(Some("/a/"), "shallow"));
        cache.put(&key(), basic(Some("/a/b/"), "deep"));

        assert_eq!(cache.len(), 2);
        let found = cache.get(&key(), Some("/a/b/c")).unwrap();
        assert_eq!(found.path(), Some("/a/"));
        assert!(cache.get(&key(), Some("/z")).is_none());
    }

    #[test]
    fn test_pathless_entry_replaces_all() {
        let cache = CredentialCache::new();
        cache.put(&key(), basic(Some("/a/"), "one"));
        cache.put(&key(), basic(Some("/b/"), "two"));
        cache.put(&key(), basic(None, "any"));

        assert_eq!(cache.len(), 1);
        let found = cache.get(&key(), Some("/whatever")).unwrap();
        assert_eq!(found.credentials().unwrap().username(), "any");
    }

    #[test]
    fn test_get_without_path_returns_most_recent() {
        let cache = CredentialCache::new();
        cache.put(&key(), basic(Some("/a/"), "first"));
        cache.put(&key(), basic(Some("/b/"), "second"));

        let found = cache.get(&key(), None).unwrap();
        assert_eq!(found.credentials().unwrap().username(), "second");
    }

    #[test]
    fn test_remove_by_identity_and_all() {
        let cache = CredentialCache::new();
        let a = basic(Some("/a/"), "a");
        let b = basic(Some("/b/"), "b");
        cache.put(&key(), a.clone());
        cache.put(&key(), b.clone());

        cache.remove(&key(), Some(&a));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(), Some("/b/x")).unwrap().id(), b.id());

        cache.remove(&key(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_add_to_cache_populates_preemptive_key() {
        let cache = CredentialCache::new();
        let entry = basic(Some("/docs/"), "u");
        cache.add_to_cache(&entry);

        assert_eq!(cache.len(), 2);
        let pre = cache
            .lookup_preemptive(AuthTarget::Server, "http", "example.com", 80, Some("/docs/a"))
            .unwrap();
        assert_eq!(pre.id(), entry.id());

        cache.remove_from_cache(&entry);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_realm_serialization_disabled() {
        let cache = CredentialCache::new();
        let slot = cache.realm_requests().acquire(&key(), 1).await;
        assert!(matches!(slot, RealmSlot::Unserialized));
    }

    #[tokio::test]
    async fn test_realm_owner_reentrant_and_waiter() {
        let cache = CredentialCache::with_serialization(true);
        let requests = Arc::clone(cache.realm_requests());

        let guard = match requests.acquire(&key(), 1).await {
            RealmSlot::Owner(g) => g,
            other => panic!("expected owner, got {:?}", other),
        };
        assert!(matches!(requests.acquire(&key(), 1).await, RealmSlot::Reentrant));
        assert_eq!(requests.owner_of(&key()), Some(1));

        let waiter = {
            let requests = Arc::clone(&requests);
            tokio::spawn(async move { requests.acquire(&key(), 2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        let slot = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(slot, RealmSlot::Waited));
        assert_eq!(requests.owner_of(&key()), None);
    }

    #[test]
    fn test_scheme_names() {
        assert_eq!(AuthScheme::from_name("NeGoTiAtE"), Some(AuthScheme::Negotiate));
        assert_eq!(AuthScheme::from_name("bearer"), None);
        assert_eq!(AuthScheme::Ntlm.as_str(), "NTLM");
        assert!(AuthScheme::Kerberos.is_two_stage());
        assert!(AuthScheme::Digest.supports_preemptive());
    }
}
