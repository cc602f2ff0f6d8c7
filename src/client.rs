//! HTTP Client with builder pattern.
//!
//! Thin front over [`SessionContext`] and [`ConnectionSession`]: the client
//! owns the shared context (credential cache, transport, proxy), each request
//! runs in its own session.
//!
//! # Example
//!
//! ```rust,ignore
//! use authnet::Client;
//!
//! let client = Client::builder()
//!     .credentials("alice", "secret")
//!     .max_redirects(5)
//!     .build();
//!
//! let resp = client.get("http://example.com/private")
//!     .send()
//!     .await?;
//! ```

use crate::base::neterror::NetError;
use crate::http::authcache::{AuthScheme, CredentialCache};
use crate::http::authprompt::{CredentialProvider, StaticCredentialProvider};
use crate::http::httpcache::HttpCache;
use crate::http::negotiateauth::AuthCapabilities;
use crate::http::orderedheaders::OrderedHeaderMap;
use crate::http::requestbody::RequestBody;
use crate::http::response::HttpResponse;
use crate::http::transaction::ConnectionSession;
use crate::socket::proxy::ProxySettings;
use crate::socket::transport::Transport;
use crate::urlrequest::context::{SessionConfig, SessionContext, SessionContextBuilder};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// HTTP Client for making requests.
///
/// Use [`Client::builder()`] to configure and create a client. Clones share
/// the credential cache.
#[derive(Clone, Debug)]
pub struct Client {
    context: Arc<SessionContext>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a new client with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Wrap an existing context.
    pub fn from_context(context: Arc<SessionContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Credentials learned so far.
    pub fn credential_cache(&self) -> &Arc<CredentialCache> {
        self.context.credential_cache()
    }

    /// Start building a GET request.
    pub fn get<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Start building a PUT request.
    pub fn put<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Start building a DELETE request.
    pub fn delete<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Start building a HEAD request.
    pub fn head<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Start building a request with custom method.
    pub fn request<U: AsRef<str>>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            method,
            url: url.as_ref().to_string(),
            headers: OrderedHeaderMap::new(),
            body: RequestBody::Empty,
            error: None,
        }
    }
}

/// Builder for creating a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    config: SessionConfig,
    context: SessionContextBuilder,
    capabilities: AuthCapabilities,
}

impl ClientBuilder {
    /// Replace the whole session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set proxy.
    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    /// Read the proxy from the environment when none is set.
    pub fn env_proxy(mut self, enabled: bool) -> Self {
        self.config.use_env_proxy = enabled;
        self
    }

    /// Set connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.connect = Some(timeout);
        self
    }

    /// Set read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.read = Some(timeout);
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.config.max_redirects = max;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Answer this scheme when a server offers several.
    pub fn prefer_scheme(mut self, scheme: AuthScheme) -> Self {
        self.config.auth_preference = Some(scheme);
        self
    }

    /// One credential resolution per realm at a time.
    pub fn serialize_auth(mut self, enabled: bool) -> Self {
        self.config.serialize_auth = enabled;
        self
    }

    /// Use the same credentials for every challenge.
    pub fn credentials(self, username: &str, password: &str) -> Self {
        self.credential_provider(Arc::new(StaticCredentialProvider::new(username, password)))
    }

    pub fn credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.context = self.context.credential_provider(provider);
        self
    }

    /// Share a credential cache with other clients.
    pub fn credential_cache(mut self, cache: Arc<CredentialCache>) -> Self {
        self.context = self.context.credential_cache(cache);
        self
    }

    /// NTLM / Negotiate security-context providers.
    pub fn capabilities(mut self, capabilities: AuthCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn response_cache(mut self, cache: Arc<HttpCache>) -> Self {
        self.context = self.context.response_cache(cache);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.context = self.context.transport(transport);
        self
    }

    /// Build the client.
    pub fn build(self) -> Client {
        let context = self
            .context
            .config(self.config)
            .capabilities(self.capabilities)
            .build();
        Client {
            context: Arc::new(context),
        }
    }
}

/// Builder for a single request.
pub struct RequestBuilder {
    client: Client,
    method: Method,
    url: String,
    headers: OrderedHeaderMap,
    body: RequestBody,
    error: Option<NetError>,
}

impl RequestBuilder {
    /// Add a header. Invalid names or values fail the request on send.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        if let Err(e) = self.headers.insert(key, value) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Set request body.
    pub fn body<B: Into<RequestBody>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Set JSON body.
    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.body = RequestBody::from(bytes);
                self.headers.set(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/json"),
                );
            }
            Err(_) => {
                self.error.get_or_insert(NetError::JsonParseError);
            }
        }
        self
    }

    /// Prepare the session without running it, for callers that want the
    /// response of a failed request or progress via [`ConnectionSession::load_state`].
    pub fn session(self) -> Result<ConnectionSession, NetError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let url = Url::parse(&self.url).map_err(|_| NetError::InvalidUrl)?;
        match url.scheme() {
            "http" | "https" => {}
            _ => return Err(NetError::UnknownUrlScheme),
        }

        let mut session = ConnectionSession::new(Arc::clone(&self.client.context), self.method, url);
        session.set_headers(self.headers);
        session.set_body(self.body);
        Ok(session)
    }

    /// Send the request.
    pub async fn send(self) -> Result<HttpResponse, NetError> {
        let mut session = self.session()?;
        session.start().await?;
        session.take_response().ok_or(NetError::EmptyResponse)
    }
}
