//! Credential prompting.
//!
//! When no cached entry answers a challenge the session asks a
//! [`CredentialProvider`], which may consult a keyring, a config file or
//! the user. Returning `None` gives up on the challenge.

use crate::http::authcache::{AuthScheme, AuthTarget};
use crate::http::authentry::Credentials;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// What the provider is being asked for.
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    pub target: AuthTarget,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub realm: String,
    pub scheme: AuthScheme,
    pub url: Url,
}

/// Source of credentials for challenges that are not already cached.
pub trait CredentialProvider: Send + Sync {
    fn request_credentials<'a>(&'a self, request: &'a CredentialRequest) -> BoxFuture<'a, Option<Credentials>>;
}

/// Fixed credentials, optionally scoped to specific hosts.
#[derive(Debug, Default)]
pub struct StaticCredentialProvider {
    fallback: Option<Credentials>,
    by_host: Mutex<HashMap<String, Credentials>>,
}

impl StaticCredentialProvider {
    /// Answer every challenge with the same credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            fallback: Some(Credentials::new(username, password)),
            by_host: Mutex::new(HashMap::new()),
        }
    }

    /// Answer nothing until hosts are added.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Use `credentials` for challenges from `host`.
    pub fn insert(&self, host: impl Into<String>, credentials: Credentials) {
        self.by_host
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(host.into().to_ascii_lowercase(), credentials);
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn request_credentials<'a>(&'a self, request: &'a CredentialRequest) -> BoxFuture<'a, Option<Credentials>> {
        let found = self
            .by_host
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&request.host.to_ascii_lowercase())
            .cloned()
            .or_else(|| self.fallback.clone());
        Box::pin(async move { found })
    }
}
