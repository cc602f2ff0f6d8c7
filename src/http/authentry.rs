//! Cached credential entries and the per-scheme state they carry.

use crate::base::neterror::NetError;
use crate::http::authcache::{AuthScheme, AuthTarget, CacheKey};
use crate::http::authchallenge::AuthChallenge;
use crate::http::basicauth::basic_header_value;
use crate::http::digestauth::{DigestChallenge, DigestParameters};
use crate::http::negotiateauth::NegotiateHandle;
use http::header::{
    HeaderName, AUTHORIZATION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, WWW_AUTHENTICATE,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zeroize::Zeroizing;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Username and password. The password is wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where a set of credentials applies: target kind, origin and realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionSpace {
    pub target: AuthTarget,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub realm: String,
}

impl ProtectionSpace {
    pub fn new(
        target: AuthTarget,
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            target,
            protocol: protocol.into(),
            host: host.into(),
            port,
            realm: realm.into(),
        }
    }

    pub fn key(&self, scheme: AuthScheme, with_realm: bool) -> CacheKey {
        CacheKey::new(
            self.target,
            scheme,
            &self.protocol,
            &self.host,
            self.port,
            with_realm.then_some(self.realm.as_str()),
        )
    }
}

/// Scheme-specific state behind an entry.
#[derive(Clone)]
pub enum SchemePayload {
    /// Precomputed `Basic ...` value.
    Basic { header_value: String },
    /// Nonce state, shared across entries created from one challenge.
    Digest { params: Arc<DigestParameters> },
    /// NTLM, Kerberos and Negotiate handshakes.
    Negotiate(Arc<NegotiateHandle>),
}

/// One cached set of credentials.
#[derive(Clone)]
pub struct CredentialEntry {
    id: u64,
    scheme: AuthScheme,
    space: ProtectionSpace,
    path: Option<String>,
    credentials: Option<Credentials>,
    payload: SchemePayload,
}

impl fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("id", &self.id)
            .field("scheme", &self.scheme)
            .field("space", &self.space)
            .field("path", &self.path)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl CredentialEntry {
    fn build(
        scheme: AuthScheme,
        space: ProtectionSpace,
        path: Option<String>,
        credentials: Option<Credentials>,
        payload: SchemePayload,
    ) -> Self {
        Self {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            scheme,
            space,
            path,
            credentials,
            payload,
        }
    }

    pub fn basic(space: ProtectionSpace, path: Option<String>, credentials: Credentials) -> Self {
        let header_value = basic_header_value(&credentials);
        Self::build(
            AuthScheme::Basic,
            space,
            path,
            Some(credentials),
            SchemePayload::Basic { header_value },
        )
    }

    pub fn digest(
        space: ProtectionSpace,
        path: Option<String>,
        credentials: Credentials,
        params: Arc<DigestParameters>,
    ) -> Self {
        Self::build(
            AuthScheme::Digest,
            space,
            path,
            Some(credentials),
            SchemePayload::Digest { params },
        )
    }

    /// NTLM, Kerberos or Negotiate entry.
    pub fn two_stage(
        space: ProtectionSpace,
        scheme: AuthScheme,
        path: Option<String>,
        handle: Arc<NegotiateHandle>,
    ) -> Self {
        let credentials = handle.credentials().cloned();
        Self::build(
            scheme,
            space,
            path,
            credentials,
            SchemePayload::Negotiate(handle),
        )
    }

    /// Same credentials and scheme state under a new path and identity.
    pub fn with_path(&self, path: Option<String>) -> Self {
        self.relocated(self.space.clone(), path)
    }

    /// Same credentials and scheme state for another origin (Digest `domain`).
    pub fn relocated(&self, space: ProtectionSpace, path: Option<String>) -> Self {
        Self::build(
            self.scheme,
            space,
            path,
            self.credentials.clone(),
            self.payload.clone(),
        )
    }

    /// Copy for a new session. Two-stage entries get their own handshake
    /// state; Digest entries keep sharing nonce state. The identity is kept
    /// so the copy can still evict the cached original.
    pub fn fresh_handshake(&self) -> Self {
        let payload = match &self.payload {
            SchemePayload::Negotiate(handle) => SchemePayload::Negotiate(Arc::new(handle.fork())),
            other => other.clone(),
        };
        Self {
            payload,
            ..self.clone()
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn target(&self) -> AuthTarget {
        self.space.target
    }

    pub fn space(&self) -> &ProtectionSpace {
        &self.space
    }

    pub fn realm(&self) -> &str {
        &self.space.realm
    }

    pub fn host(&self) -> &str {
        &self.space.host
    }

    pub fn port(&self) -> u16 {
        self.space.port
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn payload(&self) -> &SchemePayload {
        &self.payload
    }

    pub fn cache_key(&self, with_realm: bool) -> CacheKey {
        self.space.key(self.scheme, with_realm)
    }

    pub fn supports_preemptive(&self) -> bool {
        self.scheme.supports_preemptive()
    }

    /// `Authorization` or `Proxy-Authorization`.
    pub fn header_name(&self) -> HeaderName {
        match self.space.target {
            AuthTarget::Server => AUTHORIZATION,
            AuthTarget::Proxy => PROXY_AUTHORIZATION,
        }
    }

    /// Header that may carry a server proof on a successful response.
    pub fn proof_header_name(&self) -> Option<HeaderName> {
        match (self.scheme, self.space.target) {
            (AuthScheme::Digest, AuthTarget::Server) => {
                Some(HeaderName::from_static("authentication-info"))
            }
            (AuthScheme::Digest, AuthTarget::Proxy) => {
                Some(HeaderName::from_static("proxy-authentication-info"))
            }
            (AuthScheme::Negotiate | AuthScheme::Kerberos, AuthTarget::Server) => {
                Some(WWW_AUTHENTICATE)
            }
            (AuthScheme::Negotiate | AuthScheme::Kerberos, AuthTarget::Proxy) => {
                Some(PROXY_AUTHENTICATE)
            }
            _ => None,
        }
    }

    /// Header value for a request without a fresh challenge (preemptive or stale retry).
    pub fn challenge_response(&self, uri: &str, method: &str) -> Result<String, NetError> {
        match &self.payload {
            SchemePayload::Basic { header_value } => Ok(header_value.clone()),
            SchemePayload::Digest { params } => {
                let credentials = self
                    .credentials
                    .as_ref()
                    .ok_or(NetError::MissingAuthCredentials)?;
                params.authorization(credentials, &self.space.realm, uri, method)
            }
            SchemePayload::Negotiate(_) => Err(NetError::UnsupportedAuthScheme),
        }
    }

    /// Header value answering `challenge`.
    pub fn respond_to_challenge(
        &self,
        challenge: &AuthChallenge,
        uri: &str,
        method: &str,
    ) -> Result<String, NetError> {
        match &self.payload {
            SchemePayload::Basic { header_value } => Ok(header_value.clone()),
            SchemePayload::Digest { params } => {
                params.apply_challenge(&DigestChallenge::from_challenge(challenge)?)?;
                self.challenge_response(uri, method)
            }
            SchemePayload::Negotiate(handle) => handle.respond(challenge.token()),
        }
    }

    /// True when `challenge` only reports an expired nonce for these credentials.
    pub fn is_stale(&self, challenge: &AuthChallenge) -> bool {
        match &self.payload {
            SchemePayload::Digest { params } => DigestChallenge::from_challenge(challenge)
                .map(|c| params.is_stale(&c))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Check the server's proof carried in [`Self::proof_header_name`].
    pub fn validate_server_proof(&self, value: &str, uri: &str) -> Result<(), NetError> {
        match &self.payload {
            SchemePayload::Digest { params } => {
                let credentials = self
                    .credentials
                    .as_ref()
                    .ok_or(NetError::MissingAuthCredentials)?;
                params.check_response(credentials, &self.space.realm, value, uri)
            }
            SchemePayload::Negotiate(handle) => {
                let challenges = AuthChallenge::parse_header(value);
                match challenges
                    .iter()
                    .find(|c| c.scheme() == Some(self.scheme))
                    .and_then(AuthChallenge::token)
                {
                    Some(token) => handle.complete(token),
                    None => Ok(()),
                }
            }
            SchemePayload::Basic { .. } => Ok(()),
        }
    }
}
