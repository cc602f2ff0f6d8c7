//! Proxy `CONNECT` tunneling.
//!
//! HTTPS targets behind an HTTP proxy are reached through a tunnel: the
//! session sends `CONNECT host:port`, answers any proxy challenges, and on a
//! `2xx` hands the raw connection to TLS. The caller's request headers are
//! set aside while the `CONNECT` exchange runs and restored afterwards.

use crate::http::orderedheaders::OrderedHeaderMap;
use http::header::{HeaderName, HeaderValue, HOST, USER_AGENT};
use std::mem;
use tokio::sync::watch;

/// Not among the `http` crate's standard header constants.
pub(crate) const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");

/// Where a session is in establishing its tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunnelState {
    /// No tunnel involved (direct, or plain HTTP through a proxy).
    #[default]
    None,
    /// `CONNECT` in flight; requests go to the proxy.
    Setup,
    /// Tunnel up; requests go to the origin through it.
    Tunneling,
}

/// `host:port` as used in the `CONNECT` request line and as the Digest URI.
pub fn connect_authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Tracks tunnel state and the request headers saved during setup.
#[derive(Debug)]
pub struct Tunnel {
    state: TunnelState,
    saved: Option<OrderedHeaderMap>,
    observers: watch::Sender<TunnelState>,
}

impl Default for Tunnel {
    fn default() -> Self {
        Self {
            state: TunnelState::None,
            saved: None,
            observers: watch::channel(TunnelState::None).0,
        }
    }
}

impl Tunnel {
    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn is_tunneling(&self) -> bool {
        self.state == TunnelState::Tunneling
    }

    /// Follow state changes as they happen.
    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.observers.subscribe()
    }

    fn set_state(&mut self, state: TunnelState) {
        self.state = state;
        self.observers.send_replace(state);
    }

    /// Switch to `Setup`, swapping the caller's headers for the `CONNECT` set.
    pub fn begin(
        &mut self,
        headers: &mut OrderedHeaderMap,
        authority: &str,
        user_agent: Option<&HeaderValue>,
    ) {
        let mut connect = OrderedHeaderMap::new();
        if let Ok(host) = HeaderValue::from_str(authority) {
            connect.set(HOST, host);
        }
        if let Some(agent) = user_agent {
            connect.set(USER_AGENT, agent.clone());
        }
        connect.set(PROXY_CONNECTION, HeaderValue::from_static("keep-alive"));

        self.saved = Some(mem::replace(headers, connect));
        self.set_state(TunnelState::Setup);
        tracing::debug!(authority, "Setting up proxy tunnel");
    }

    /// Switch to `Tunneling` and put the caller's headers back untouched.
    pub fn complete(&mut self, headers: &mut OrderedHeaderMap) {
        self.restore(headers);
        self.set_state(TunnelState::Tunneling);
        tracing::debug!("Proxy tunnel established");
    }

    /// Abandon setup, restoring the caller's headers.
    pub fn abort(&mut self, headers: &mut OrderedHeaderMap) {
        self.restore(headers);
        self.set_state(TunnelState::None);
    }

    /// Forget the tunnel, e.g. when the connection it lived on is dropped.
    pub fn reset(&mut self) {
        self.set_state(TunnelState::None);
    }

    fn restore(&mut self, headers: &mut OrderedHeaderMap) {
        if let Some(saved) = self.saved.take() {
            *headers = saved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_forms() {
        assert_eq!(connect_authority("example.com", 443), "example.com:443");
        assert_eq!(connect_authority("::1", 8443), "[::1]:8443");
    }

    #[test]
    fn test_headers_saved_and_restored() {
        let mut headers = OrderedHeaderMap::new();
        headers.insert("X-Custom", "1").unwrap();
        headers.insert("Authorization", "Bearer t").unwrap();
        let original = headers.clone();

        let mut tunnel = Tunnel::default();
        tunnel.begin(&mut headers, "example.com:443", Some(&HeaderValue::from_static("ua")));
        assert_eq!(tunnel.state(), TunnelState::Setup);
        assert_eq!(headers.get("host").unwrap(), "example.com:443");
        assert!(headers.get("x-custom").is_none());
        assert!(headers.get("authorization").is_none());

        tunnel.complete(&mut headers);
        assert!(tunnel.is_tunneling());
        assert_eq!(headers, original);
    }

    #[test]
    fn test_subscribers_see_transitions() {
        let mut headers = OrderedHeaderMap::new();
        let mut tunnel = Tunnel::default();
        let watcher = tunnel.subscribe();
        assert_eq!(*watcher.borrow(), TunnelState::None);

        tunnel.begin(&mut headers, "h:443", None);
        assert_eq!(*watcher.borrow(), TunnelState::Setup);
        tunnel.complete(&mut headers);
        assert_eq!(*watcher.borrow(), TunnelState::Tunneling);
        tunnel.reset();
        assert_eq!(*watcher.borrow(), TunnelState::None);
    }

    #[test]
    fn test_abort_restores() {
        let mut headers = OrderedHeaderMap::new();
        headers.insert("X-Custom", "1").unwrap();
        let mut tunnel = Tunnel::default();
        tunnel.begin(&mut headers, "h:443", None);
        tunnel.abort(&mut headers);
        assert_eq!(tunnel.state(), TunnelState::None);
        assert!(headers.get("x-custom").is_some());
    }
}
