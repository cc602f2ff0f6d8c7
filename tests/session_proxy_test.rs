//! Proxy authentication and CONNECT tunneling through full sessions.

mod common;

use authnet::base::neterror::NetError;
use authnet::http::negotiateauth::AuthCapabilities;
use authnet::http::tunnel::TunnelState;
use authnet::socket::proxy::{ProxyBuilder, ProxySettings};
use authnet::socket::transport::Endpoint;
use authnet::{Client, ClientBuilder};
use common::{auth_param, digest_is_valid, MockTransport, Reply};
use http::Method;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

fn builder(mock: &MockTransport) -> ClientBuilder {
    Client::builder().transport(Arc::new(mock.clone()))
}

fn proxy() -> ProxySettings {
    ProxyBuilder::new()
        .url("http://proxy.local:3128")
        .auth("puser", "ppass")
        .no_proxy("")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_plain_http_through_proxy_with_basic() {
    // base64("puser:ppass")
    let mock = MockTransport::new(|req| match req.header("proxy-authorization") {
        Some("Basic cHVzZXI6cHBhc3M=") => Reply::ok("proxied"),
        _ => Reply::status(407).header("Proxy-Authenticate", "Basic realm=\"gateway\""),
    });
    let client = builder(&mock).proxy(proxy()).build();

    let resp = client.get("http://example.com/page?x=1").send().await.unwrap();
    assert_eq!(resp.text().unwrap(), "proxied");
    client.get("http://example.com/again").send().await.unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].target, "http://example.com/page?x=1");
    assert_eq!(requests[0].endpoint, Endpoint::new("proxy.local", 3128, false));
    assert_eq!(requests[0].header("proxy-connection"), Some("keep-alive"));
    assert!(requests[0].header("connection").is_none());
    assert_eq!(
        requests[2].header("proxy-authorization"),
        Some("Basic cHVzZXI6cHBhc3M="),
        "proxy credentials should be sent preemptively"
    );
}

#[tokio::test]
async fn test_tunnel_with_digest_proxy_auth() {
    let watcher: Arc<Mutex<Option<watch::Receiver<TunnelState>>>> = Arc::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (watching, log) = (watcher.clone(), seen.clone());
    let mock = MockTransport::new(move |req| {
        if let Some(rx) = watching.lock().unwrap().as_ref() {
            log.lock().unwrap().push((req.method.clone(), *rx.borrow()));
        }
        if req.method == Method::CONNECT {
            return match req.header("proxy-authorization") {
                Some(h) if digest_is_valid(h, "puser", "ppass", "CONNECT") => Reply::ok(""),
                _ => Reply::status(407).header(
                    "Proxy-Authenticate",
                    "Digest realm=\"gateway\", nonce=\"pn\", qop=\"auth\"",
                ),
            };
        }
        assert!(req.tunneled, "origin request must go through the tunnel");
        Reply::ok("secure")
    });
    let client = builder(&mock).proxy(proxy()).build();

    let mut session = client
        .get("https://secure.example/account")
        .header("X-Custom", "kept")
        .session()
        .unwrap();
    *watcher.lock().unwrap() = Some(session.watch_tunnel());
    session.start().await.unwrap();
    assert_eq!(session.take_response().unwrap().text().unwrap(), "secure");

    // Challenge and answer both happen during setup; the origin request goes
    // through the established tunnel.
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (Method::CONNECT, TunnelState::Setup),
            (Method::CONNECT, TunnelState::Setup),
            (Method::GET, TunnelState::Tunneling),
        ]
    );

    let requests = mock.requests();
    assert_eq!(requests.len(), 3);

    let connect = &requests[0];
    assert_eq!(connect.method, Method::CONNECT);
    assert_eq!(connect.target, "secure.example:443");
    assert_eq!(connect.header("host"), Some("secure.example:443"));
    assert!(connect.header("x-custom").is_none());

    let answered = requests[1].header("proxy-authorization").unwrap();
    assert_eq!(auth_param(answered, "uri").as_deref(), Some("secure.example:443"));

    let origin = &requests[2];
    assert_eq!(origin.target, "/account");
    assert_eq!(origin.header("x-custom"), Some("kept"));
    assert!(origin.header("proxy-authorization").is_none());
    assert_eq!(origin.connection, requests[1].connection);

    assert_eq!(mock.tunnels(), vec![("secure.example".to_string(), 443)]);
    assert_eq!(session.tunnel_state(), TunnelState::None);
}

#[tokio::test]
async fn test_tunnel_refused() {
    let mock = MockTransport::script(vec![Reply::status(403)]);
    let client = builder(&mock).proxy(proxy()).build();
    let err = client.get("https://secure.example/").send().await.unwrap_err();
    assert_eq!(err, NetError::TunnelConnectionFailed);
    assert!(mock.tunnels().is_empty());
}

#[tokio::test]
async fn test_tunnel_auth_rejected() {
    let mock = MockTransport::script(vec![
        Reply::status(407).header("Proxy-Authenticate", "Basic realm=\"gateway\"")
    ]);
    let client = builder(&mock).proxy(proxy()).build();
    let err = client.get("https://secure.example/").send().await.unwrap_err();
    assert_eq!(err, NetError::TunnelConnectionFailed);
}

#[tokio::test]
async fn test_proxy_auth_through_tunnel_is_unexpected() {
    let mock = MockTransport::new(|req| {
        if req.method == Method::CONNECT {
            Reply::ok("")
        } else {
            Reply::status(407).header("Proxy-Authenticate", "Basic realm=\"x\"")
        }
    });
    let client = builder(&mock).proxy(proxy()).build();
    let err = client.get("https://secure.example/").send().await.unwrap_err();
    assert_eq!(err, NetError::UnexpectedProxyAuth);
}

#[tokio::test]
async fn test_proxy_auth_without_proxy_is_unexpected() {
    let mock = MockTransport::script(vec![
        Reply::status(407).header("Proxy-Authenticate", "Basic realm=\"x\"")
    ]);
    let client = builder(&mock).build();
    let err = client.get("http://example.com/").send().await.unwrap_err();
    assert_eq!(err, NetError::UnexpectedProxyAuth);
}

#[tokio::test]
async fn test_unsupported_proxy_scheme() {
    let mock = MockTransport::script(vec![
        Reply::status(407).header("Proxy-Authenticate", "NTLM")
    ]);
    let client = builder(&mock)
        .proxy(proxy())
        .capabilities(AuthCapabilities::default())
        .build();
    let err = client.get("http://example.com/").send().await.unwrap_err();
    assert_eq!(err, NetError::ProxyAuthUnsupported);
}

#[tokio::test]
async fn test_use_proxy_redirect() {
    let mock = MockTransport::new(|req| {
        if req.endpoint.host == "example.com" {
            Reply::status(305).header("Location", "http://relay.local:8080/")
        } else {
            Reply::ok("via relay")
        }
    });
    let client = builder(&mock).build();

    let resp = client.get("http://example.com/doc").send().await.unwrap();
    assert_eq!(resp.text().unwrap(), "via relay");
    assert_eq!(resp.url().as_str(), "http://example.com/doc");

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].endpoint, Endpoint::new("relay.local", 8080, false));
    assert_eq!(requests[1].target, "http://example.com/doc");
}

#[tokio::test]
async fn test_bypassed_host_goes_direct() {
    let mock = MockTransport::script(vec![Reply::ok("direct")]);
    let proxy = ProxySettings::new("proxy.local:3128").unwrap().with_bypass("*.internal");
    let client = builder(&mock).proxy(proxy).build();

    client.get("http://wiki.internal/").send().await.unwrap();
    assert_eq!(mock.connects(), vec![Endpoint::new("wiki.internal", 80, false)]);
    assert_eq!(mock.requests()[0].target, "/");
}
