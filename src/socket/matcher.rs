//! Proxy bypass rules.
//!
//! Accepts both curl-style `NO_PROXY` lists (`localhost, .corp.example, 10.0.0.0/8`)
//! and `nonProxyHosts`-style lists (`localhost|*.corp.example`).

use std::net::IpAddr;
use url::Url;

/// One bypass entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassRule {
    /// `*`: every host goes direct.
    All,
    /// Host name, matching itself and its subdomains.
    Domain(String),
    Ip(IpAddr),
    Cidr(IpAddr, u8),
}

impl BypassRule {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        if entry == "*" {
            return Some(Self::All);
        }

        if let Some((ip, prefix)) = entry.split_once('/') {
            if let (Ok(ip), Ok(prefix)) = (ip.parse::<IpAddr>(), prefix.parse::<u8>()) {
                return Some(Self::Cidr(ip, prefix));
            }
        }

        let bare = entry.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Some(Self::Ip(ip));
        }

        // "*.example.com" and ".example.com" both mean "example.com and below".
        let domain = entry
            .trim_start_matches('*')
            .trim_start_matches('.')
            .to_ascii_lowercase();
        (!domain.is_empty()).then_some(Self::Domain(domain))
    }

    fn matches(&self, host: &str, ip: Option<IpAddr>) -> bool {
        match (self, ip) {
            (Self::All, _) => true,
            (Self::Ip(rule), Some(ip)) => *rule == ip,
            (Self::Cidr(net, prefix), Some(ip)) => cidr_contains(*net, *prefix, ip),
            (Self::Domain(domain), None) => {
                host == domain
                    || host
                        .strip_suffix(domain.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }
            _ => false,
        }
    }
}

/// Decides which hosts skip the proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyMatcher {
    rules: Vec<BypassRule>,
}

impl ProxyMatcher {
    /// Read `NO_PROXY`, then `no_proxy`.
    pub fn from_env() -> Self {
        let raw = std::env::var("NO_PROXY")
            .or_else(|_| std::env::var("no_proxy"))
            .unwrap_or_default();
        Self::from_string(&raw)
    }

    /// Parse a list separated by `,` or `|`.
    pub fn from_string(list: &str) -> Self {
        Self {
            rules: list
                .split(|c| c == ',' || c == '|')
                .filter_map(BypassRule::parse)
                .collect(),
        }
    }

    pub fn rules(&self) -> &[BypassRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check if a host should bypass the proxy.
    pub fn should_bypass(&self, host: &str) -> bool {
        let host = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        let ip = host.parse::<IpAddr>().ok();
        self.rules.iter().any(|rule| rule.matches(&host, ip))
    }

    /// Check if URL should bypass proxy.
    pub fn should_bypass_url(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|h| self.should_bypass(h))
    }
}

/// Check if IP is within CIDR range.
fn cidr_contains(network: IpAddr, prefix: u8, addr: IpAddr) -> bool {
    match (network, addr) {
        (IpAddr::V4(net), IpAddr::V4(ip)) if prefix <= 32 => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) if prefix <= 128 => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}
