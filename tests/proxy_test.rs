//! Proxy System Tests
//!
//! Covers:
//! - `ProxySettings` parsing and credentials
//! - `ProxyBuilder` API
//! - `ProxyMatcher` bypass logic
//! - Proxy selection through `SessionContext`

use authnet::socket::matcher::ProxyMatcher;
use authnet::socket::proxy::{ProxyBuilder, ProxySettings};
use authnet::socket::transport::Endpoint;
use authnet::{SessionConfig, SessionContext};
use url::Url;

#[test]
fn test_proxy_builder_http() {
    let proxy = ProxyBuilder::new()
        .url("proxy.example.com:8080")
        .auth("user", "pass")
        .no_proxy("")
        .build()
        .unwrap();

    let credentials = proxy.credentials().unwrap();
    assert_eq!(credentials.username(), "user");
    assert_eq!(credentials.password(), "pass");

    let (host, port) = proxy.host_port();
    assert_eq!(host, "proxy.example.com");
    assert_eq!(port, 8080);
    assert_eq!(proxy.endpoint(), Endpoint::new("proxy.example.com", 8080, false));
}

#[test]
fn test_proxy_without_auth() {
    let proxy = ProxySettings::new("http://proxy.example.com").unwrap();
    assert!(proxy.credentials().is_none());
    assert_eq!(proxy.host_port().1, 80);
}

#[test]
fn test_proxy_builder_requires_url() {
    assert!(ProxyBuilder::new().auth("u", "p").build().is_err());
}

#[test]
fn test_proxy_bypass_rules() {
    let proxy = ProxyBuilder::new()
        .url("proxy.internal")
        .no_proxy("localhost,127.0.0.1,.local")
        .build()
        .unwrap();

    let localhost = Url::parse("http://localhost/").unwrap();
    assert!(proxy.should_bypass(&localhost));

    let external = Url::parse("http://example.com/").unwrap();
    assert!(!proxy.should_bypass(&external));

    let local_domain = Url::parse("http://my.local/").unwrap();
    assert!(proxy.should_bypass(&local_domain));
}

#[test]
fn test_matcher_pipe_separated() {
    let matcher = ProxyMatcher::from_string("localhost|*.corp.example");
    assert!(matcher.should_bypass("localhost"));
    assert!(matcher.should_bypass("wiki.corp.example"));
    assert!(!matcher.should_bypass("example.com"));
}

#[test]
fn test_matcher_cidr() {
    let matcher = ProxyMatcher::from_string("10.0.0.0/8");
    assert!(matcher.should_bypass("10.1.2.3"));
    assert!(!matcher.should_bypass("11.0.0.1"));
}

#[test]
fn test_context_selects_proxy_per_url() {
    let config = SessionConfig {
        proxy: Some(ProxySettings::new("proxy.local:3128").unwrap().with_bypass("intranet.example")),
        ..Default::default()
    };
    let ctx = SessionContext::builder().config(config).build();

    let selected = ctx.proxy_for(&Url::parse("https://example.org/").unwrap()).unwrap();
    assert_eq!(selected.host_port(), ("proxy.local".to_string(), 3128));
    assert!(ctx
        .proxy_for(&Url::parse("http://docs.intranet.example/").unwrap())
        .is_none());
}

#[test]
fn test_no_proxy_without_configuration() {
    let ctx = SessionContext::new();
    assert!(ctx.proxy_for(&Url::parse("http://example.com/").unwrap()).is_none());
}
