//! The byte-level seam between a session and the network.
//!
//! A [`Transport`] opens [`TransportSession`]s to an [`Endpoint`] (the origin
//! or the proxy). A session exchanges one request/response at a time and can
//! be turned into a tunnel after a successful `CONNECT`. The production
//! implementation is [`crate::http::streamfactory::HttpStreamFactory`];
//! tests substitute scripted transports.

use crate::base::neterror::NetError;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use http::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Where to open a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Wrap the connection in TLS.
    pub tls: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection and read deadlines. `None` waits forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    #[serde(with = "millis")]
    pub connect: Option<Duration>,
    #[serde(with = "millis")]
    pub read: Option<Duration>,
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis))
    }
}

/// Outgoing request body as handed to the wire.
pub enum TransportBody {
    Empty,
    Full(Bytes),
    /// Written as it is produced; consumed by one send.
    Stream(BoxStream<'static, Result<Bytes, NetError>>),
}

impl fmt::Debug for TransportBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(b) => write!(f, "Full({} bytes)", b.len()),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// One request as written to a connection.
#[derive(Debug)]
pub struct TransportRequest {
    pub method: Method,
    /// Request target: origin-form path, absolute URL through a proxy, or
    /// `host:port` for `CONNECT`.
    pub target: String,
    pub headers: HeaderMap,
    pub body: TransportBody,
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Opens connections.
pub trait Transport: Send + Sync {
    fn connect<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        timeouts: &'a Timeouts,
    ) -> BoxFuture<'a, Result<Box<dyn TransportSession>, NetError>>;
}

/// An open connection.
pub trait TransportSession: Send {
    /// Write a request and read the response head.
    fn send(&mut self, request: TransportRequest) -> BoxFuture<'_, Result<ResponseHead, NetError>>;

    /// Read the remaining body of the last response.
    fn read_body(&mut self) -> BoxFuture<'_, Result<Bytes, NetError>>;

    /// Turn the connection into a tunnel after a `2xx` answer to `CONNECT`,
    /// optionally starting TLS to `host` inside it.
    fn establish_tunnel<'a>(
        &'a mut self,
        host: &'a str,
        port: u16,
        tls: bool,
    ) -> BoxFuture<'a, Result<(), NetError>>;

    /// Whether another request may be sent on this connection.
    fn is_reusable(&self) -> bool;

    /// Drop the connection.
    fn close(&mut self);
}
