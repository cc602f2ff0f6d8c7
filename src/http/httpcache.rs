//! In-memory response cache.
//!
//! Chromium mapping: net/http/http_cache.h (simplified in-memory version)
//!
//! Sessions consult the cache before opening a connection for GET/HEAD and
//! store final responses whose status is cacheable (200, 203, 206, 300, 301,
//! 410) and whose `Cache-Control` grants a `max-age`.

use bytes::Bytes;
use dashmap::DashMap;
use http::{HeaderMap, Method, StatusCode};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use url::Url;

/// Statuses a final response may be cached with.
const CACHEABLE_STATUSES: [u16; 6] = [200, 203, 206, 300, 301, 410];

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct ResponseKey {
    /// URL without fragment
    url: String,
    method: Method,
}

impl ResponseKey {
    fn new(url: &Url, method: &Method) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            url: url.into(),
            method: method.clone(),
        }
    }
}

/// Cached response entry.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    cached_at: Instant,
    ttl: Duration,
    seq: u64,
}

impl CachedResponse {
    /// Check if the entry is still fresh.
    pub fn is_fresh(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

/// Cache mode for controlling behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Normal,
    /// Bypass cache for reads and writes
    Disabled,
    /// Only read from cache, don't write
    ReadOnly,
}

/// In-memory HTTP cache.
///
/// Thread-safe implementation using DashMap for concurrent access.
/// Enforces entry-count and byte limits.
pub struct HttpCache {
    entries: DashMap<ResponseKey, CachedResponse>,
    max_entries: usize,
    current_size: AtomicUsize,
    max_size_bytes: usize,
    mode: CacheMode,
    next_seq: AtomicU64,
}

impl Default for HttpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCache")
            .field("entries", &self.entries.len())
            .field("size_bytes", &self.size_bytes())
            .field("mode", &self.mode)
            .finish()
    }
}

impl HttpCache {
    /// Create a new cache with default limits.
    pub fn new() -> Self {
        Self::with_limits(1000, 50 * 1024 * 1024)
    }

    /// Create a cache with custom limits.
    pub fn with_limits(max_entries: usize, max_size_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            current_size: AtomicUsize::new(0),
            max_size_bytes,
            mode: CacheMode::Normal,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    fn cacheable_method(method: &Method) -> bool {
        *method == Method::GET || *method == Method::HEAD
    }

    /// Look up a fresh cached response.
    pub fn get(&self, url: &Url, method: &Method) -> Option<CachedResponse> {
        if self.mode == CacheMode::Disabled || !Self::cacheable_method(method) {
            return None;
        }

        let key = ResponseKey::new(url, method);
        let entry = self.entries.get(&key)?;
        if entry.is_fresh() {
            tracing::debug!(url = %url, "Response cache hit");
            Some(entry.clone())
        } else {
            drop(entry);
            self.remove_by_key(&key);
            None
        }
    }

    /// Store a final response if its status, method and headers allow it.
    pub fn store(
        &self,
        url: &Url,
        method: &Method,
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
    ) -> bool {
        if self.mode != CacheMode::Normal
            || !Self::cacheable_method(method)
            || !CACHEABLE_STATUSES.contains(&status.as_u16())
        {
            return false;
        }

        let cache_control = parse_cache_control(headers);
        if cache_control.no_store || cache_control.no_cache {
            return false;
        }
        let Some(max_age) = cache_control.max_age.filter(|age| *age > 0) else {
            return false;
        };
        if body.len() > self.max_size_bytes {
            return false;
        }

        let key = ResponseKey::new(url, method);
        self.remove_by_key(&key);
        self.maybe_evict(body.len());

        self.current_size.fetch_add(body.len(), Ordering::Relaxed);
        self.entries.insert(
            key,
            CachedResponse {
                status,
                headers: headers.clone(),
                body,
                cached_at: Instant::now(),
                ttl: Duration::from_secs(max_age),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        tracing::trace!(url = %url, status = status.as_u16(), "Stored response");
        true
    }

    /// Remove an entry from the cache.
    pub fn remove(&self, url: &Url, method: &Method) {
        self.remove_by_key(&ResponseKey::new(url, method));
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        self.entries.clear();
        self.current_size.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get current cache size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.current_size.load(Ordering::Relaxed)
    }

    fn maybe_evict(&self, new_entry_size: usize) {
        while self.entries.len() >= self.max_entries && !self.entries.is_empty() {
            self.evict_one();
        }
        while self.current_size.load(Ordering::Relaxed) + new_entry_size > self.max_size_bytes
            && !self.entries.is_empty()
        {
            self.evict_one();
        }
    }

    /// Evict the oldest entry.
    fn evict_one(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().seq)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.remove_by_key(&key);
        }
    }

    fn remove_by_key(&self, key: &ResponseKey) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.current_size
                .fetch_sub(entry.body.len(), Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Default)]
struct CacheControl {
    no_store: bool,
    no_cache: bool,
    max_age: Option<u64>,
}

fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut cc = CacheControl::default();

    for value in headers
        .get_all(http::header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
    {
        for directive in value.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            match directive.as_str() {
                "no-store" => cc.no_store = true,
                "no-cache" => cc.no_cache = true,
                _ => {
                    if let Some(age) = directive.strip_prefix("max-age=") {
                        cc.max_age = age.trim_matches('"').parse().ok();
                    }
                }
            }
        }
    }

    cc
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(cache_control: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(http::header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
        h
    }

    #[test]
    fn test_cache_store_and_get() {
        let cache = HttpCache::new();
        let url = Url::parse("https://example.com/page#frag").unwrap();

        assert!(cache.store(&url, &Method::GET, StatusCode::OK, &headers("max-age=3600"), Bytes::from("hello")));

        let plain = Url::parse("https://example.com/page").unwrap();
        let entry = cache.get(&plain, &Method::GET).unwrap();
        assert_eq!(entry.body, Bytes::from("hello"));
        assert_eq!(cache.size_bytes(), 5);
    }

    #[test]
    fn test_status_filter() {
        let cache = HttpCache::new();
        let url = Url::parse("https://example.com/x").unwrap();
        let h = headers("max-age=60");

        assert!(cache.store(&url, &Method::GET, StatusCode::GONE, &h, Bytes::new()));
        assert!(!cache.store(&url, &Method::GET, StatusCode::NOT_FOUND, &h, Bytes::new()));
        assert!(!cache.store(&url, &Method::GET, StatusCode::FOUND, &h, Bytes::new()));
    }

    #[test]
    fn test_no_store_and_missing_max_age() {
        let cache = HttpCache::new();
        let url = Url::parse("https://example.com/secret").unwrap();

        assert!(!cache.store(&url, &Method::GET, StatusCode::OK, &headers("no-store, max-age=60"), Bytes::new()));
        assert!(!cache.store(&url, &Method::GET, StatusCode::OK, &HeaderMap::new(), Bytes::new()));
        assert!(cache.get(&url, &Method::GET).is_none());
    }

    #[test]
    fn test_post_not_cached() {
        let cache = HttpCache::new();
        let url = Url::parse("https://example.com/api").unwrap();
        assert!(!cache.store(&url, &Method::POST, StatusCode::OK, &headers("max-age=3600"), Bytes::from("data")));
        assert!(cache.get(&url, &Method::POST).is_none());
    }

    #[test]
    fn test_eviction_by_count() {
        let cache = HttpCache::with_limits(2, 1024);
        let h = headers("max-age=60");
        for i in 0..3 {
            let url = Url::parse(&format!("https://example.com/{}", i)).unwrap();
            cache.store(&url, &Method::GET, StatusCode::OK, &h, Bytes::from("x"));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&Url::parse("https://example.com/0").unwrap(), &Method::GET).is_none());
    }

    #[test]
    fn test_modes() {
        let url = Url::parse("https://example.com/page").unwrap();
        let h = headers("max-age=3600");

        let disabled = HttpCache::new().with_mode(CacheMode::Disabled);
        assert!(!disabled.store(&url, &Method::GET, StatusCode::OK, &h, Bytes::new()));

        let read_only = HttpCache::new().with_mode(CacheMode::ReadOnly);
        assert!(!read_only.store(&url, &Method::GET, StatusCode::OK, &h, Bytes::new()));
    }

    #[test]
    fn test_parse_cache_control() {
        let cc = parse_cache_control(&headers("max-age=3600, no-cache"));
        assert_eq!(cc.max_age, Some(3600));
        assert!(cc.no_cache);
        assert!(!cc.no_store);
    }
}
