//! Session context - shared configuration and state for connection sessions.
//!
//! Based on Chromium's net::URLRequestContext: one place that bundles the
//! transport, the credential cache, the authentication capabilities and the
//! options every [`ConnectionSession`](crate::http::transaction::ConnectionSession)
//! created from it runs with.

use crate::base::neterror::NetError;
use crate::http::authcache::{AuthScheme, CredentialCache};
use crate::http::authprompt::CredentialProvider;
use crate::http::httpcache::HttpCache;
use crate::http::negotiateauth::AuthCapabilities;
use crate::http::streamfactory::HttpStreamFactory;
use crate::socket::proxy::ProxySettings;
use crate::socket::transport::{Timeouts, Transport};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

/// Options for sessions created from a [`SessionContext`].
///
/// Deserializable so applications can keep it in their own config files;
/// the proxy is set programmatically.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on redirects plus authentication retries.
    pub max_redirects: u32,

    /// Follow 3xx responses.
    pub follow_redirects: bool,

    /// Keep POST on 301/302/303 instead of switching to GET.
    pub strict_post_redirect: bool,

    /// Let only one session at a time resolve credentials for a realm.
    pub serialize_auth: bool,

    /// Check `Authentication-Info` on successful responses.
    pub validate_server_proof: bool,

    /// Check `Proxy-Authentication-Info` on successful responses.
    pub validate_proxy_proof: bool,

    /// Scheme to answer when the server offers several.
    pub auth_preference: Option<AuthScheme>,

    /// User-Agent string to use for requests.
    pub user_agent: String,

    pub timeouts: Timeouts,

    /// Explicit proxy (None for direct connections unless `use_env_proxy`).
    #[serde(skip)]
    pub proxy: Option<ProxySettings>,

    /// Take the proxy from `HTTP(S)_PROXY` / `NO_PROXY` when none is set.
    pub use_env_proxy: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_redirects: 20,
            follow_redirects: true,
            strict_post_redirect: false,
            serialize_auth: false,
            validate_server_proof: false,
            validate_proxy_proof: false,
            auth_preference: None,
            user_agent: concat!("authnet/", env!("CARGO_PKG_VERSION")).to_string(),
            timeouts: Timeouts::default(),
            proxy: None,
            use_env_proxy: false,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        serde_json::from_str(json).map_err(|e| {
            tracing::warn!(error = %e, "Invalid session config");
            NetError::JsonParseError
        })
    }
}

/// Shared state for connection sessions.
pub struct SessionContext {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    credential_cache: Arc<CredentialCache>,
    capabilities: AuthCapabilities,
    credential_provider: Option<Arc<dyn CredentialProvider>>,
    response_cache: Option<Arc<HttpCache>>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .field("credential_cache", &self.credential_cache)
            .field("capabilities", &self.capabilities)
            .field("credential_provider", &self.credential_provider.is_some())
            .field("response_cache", &self.response_cache)
            .finish()
    }
}

impl SessionContext {
    /// Create a context with default configuration and the hyper transport.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SessionContextBuilder {
        SessionContextBuilder::default()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn credential_cache(&self) -> &Arc<CredentialCache> {
        &self.credential_cache
    }

    pub fn capabilities(&self) -> &AuthCapabilities {
        &self.capabilities
    }

    pub fn credential_provider(&self) -> Option<&Arc<dyn CredentialProvider>> {
        self.credential_provider.as_ref()
    }

    pub fn response_cache(&self) -> Option<&Arc<HttpCache>> {
        self.response_cache.as_ref()
    }

    /// Proxy to use for `url`, honoring bypass rules.
    pub fn proxy_for(&self, url: &Url) -> Option<ProxySettings> {
        let proxy = match &self.config.proxy {
            Some(proxy) => Some(proxy.clone()),
            None if self.config.use_env_proxy => ProxySettings::from_env(url.scheme()),
            None => None,
        }?;
        if proxy.should_bypass(url) {
            tracing::trace!(url = %url, "Bypassing proxy");
            return None;
        }
        Some(proxy)
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`SessionContext`].
#[derive(Default)]
pub struct SessionContextBuilder {
    config: Option<SessionConfig>,
    transport: Option<Arc<dyn Transport>>,
    credential_cache: Option<Arc<CredentialCache>>,
    capabilities: AuthCapabilities,
    credential_provider: Option<Arc<dyn CredentialProvider>>,
    response_cache: Option<Arc<HttpCache>>,
}

impl SessionContextBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the hyper transport (tests use scripted transports).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share a credential cache between contexts. Without this, a fresh
    /// cache is created honoring `serialize_auth`.
    pub fn credential_cache(mut self, cache: Arc<CredentialCache>) -> Self {
        self.credential_cache = Some(cache);
        self
    }

    pub fn capabilities(mut self, capabilities: AuthCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credential_provider = Some(provider);
        self
    }

    pub fn response_cache(mut self, cache: Arc<HttpCache>) -> Self {
        self.response_cache = Some(cache);
        self
    }

    pub fn build(self) -> SessionContext {
        let config = self.config.unwrap_or_default();
        let credential_cache = self
            .credential_cache
            .unwrap_or_else(|| Arc::new(CredentialCache::with_serialization(config.serialize_auth)));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpStreamFactory::new()));

        SessionContext {
            config,
            transport,
            credential_cache,
            capabilities: self.capabilities,
            credential_provider: self.credential_provider,
            response_cache: self.response_cache,
        }
    }
}
