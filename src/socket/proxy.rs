use super::matcher::ProxyMatcher;
use crate::base::neterror::NetError;
use crate::http::authentry::Credentials;
use crate::socket::transport::Endpoint;
use url::Url;
use zeroize::Zeroizing;

/// HTTP proxy configuration with bypass rules.
///
/// Plain-HTTP targets are sent to the proxy in absolute form; HTTPS targets
/// are tunneled with `CONNECT`.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Proxy URL (e.g., `http://proxy.com:8080`)
    pub url: Url,
    /// Username offered to the proxy before prompting
    pub username: Option<String>,
    /// Password (zeroized on drop)
    pub password: Option<Zeroizing<String>>,
    bypass: ProxyMatcher,
}

impl ProxySettings {
    /// Parse a proxy URL. A bare `host:port` is taken as `http://host:port`.
    pub fn new(url_str: &str) -> Result<Self, NetError> {
        let url = if url_str.contains("://") {
            Url::parse(url_str)
        } else {
            Url::parse(&format!("http://{}", url_str))
        }
        .map_err(|_| NetError::InvalidUrl)?;

        if url.scheme() != "http" {
            return Err(NetError::NoSupportedProxies);
        }
        if url.host_str().is_none() {
            return Err(NetError::InvalidUrl);
        }

        let username = (!url.username().is_empty()).then(|| url.username().to_string());
        let password = url.password().map(|p| Zeroizing::new(p.to_string()));

        Ok(Self {
            url,
            username,
            password,
            bypass: ProxyMatcher::default(),
        })
    }

    /// Proxy for `target_scheme` from the environment.
    ///
    /// `https` targets check `HTTPS_PROXY` before `HTTP_PROXY`; bypass rules
    /// come from `NO_PROXY`.
    pub fn from_env(target_scheme: &str) -> Option<Self> {
        let mut names = Vec::with_capacity(4);
        if target_scheme == "https" {
            names.extend(["HTTPS_PROXY", "https_proxy"]);
        }
        names.extend(["HTTP_PROXY", "http_proxy"]);

        let raw = names
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))?;
        match Self::new(&raw) {
            Ok(settings) => Some(settings.with_matcher(ProxyMatcher::from_env())),
            Err(e) => {
                tracing::warn!(proxy = %raw, error = %e, "Ignoring unusable proxy from environment");
                None
            }
        }
    }

    /// Add authentication credentials.
    pub fn with_auth(mut self, user: &str, pass: &str) -> Self {
        self.username = Some(user.to_string());
        self.password = Some(Zeroizing::new(pass.to_string()));
        self
    }

    /// Add bypass rules.
    pub fn with_bypass(self, no_proxy: &str) -> Self {
        self.with_matcher(ProxyMatcher::from_string(no_proxy))
    }

    fn with_matcher(mut self, bypass: ProxyMatcher) -> Self {
        self.bypass = bypass;
        self
    }

    /// Check if URL should bypass this proxy.
    pub fn should_bypass(&self, target: &Url) -> bool {
        self.bypass.should_bypass_url(target)
    }

    /// Configured credentials, used before asking the credential provider.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some(Credentials::new(u.as_str(), p.as_str())),
            _ => None,
        }
    }

    /// Get proxy host and port.
    pub fn host_port(&self) -> (String, u16) {
        let host = self.url.host_str().unwrap_or_default().to_string();
        (host, self.url.port().unwrap_or(80))
    }

    /// Where to connect to reach the proxy.
    pub fn endpoint(&self) -> Endpoint {
        let (host, port) = self.host_port();
        Endpoint::new(host, port, false)
    }
}

/// Builder for ProxySettings.
#[derive(Default)]
pub struct ProxyBuilder {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    no_proxy: Option<String>,
}

impl ProxyBuilder {
    /// Create new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set proxy URL or `host:port`.
    pub fn url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    /// Set authentication.
    pub fn auth(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Set bypass rules. Without this, `NO_PROXY` is used.
    pub fn no_proxy(mut self, rules: &str) -> Self {
        self.no_proxy = Some(rules.to_string());
        self
    }

    /// Build ProxySettings.
    pub fn build(self) -> Result<ProxySettings, NetError> {
        let url = self.url.ok_or(NetError::InvalidUrl)?;
        let mut settings = ProxySettings::new(&url)?;
        if let (Some(u), Some(p)) = (self.username, self.password) {
            settings = settings.with_auth(&u, &p);
        }
        let bypass = match self.no_proxy {
            Some(rules) => ProxyMatcher::from_string(&rules),
            None => ProxyMatcher::from_env(),
        };
        Ok(settings.with_matcher(bypass))
    }
}
