//! Scripted transport shared by the session tests.
//!
//! A handler closure sees every request (with the connection it arrived on)
//! and picks the reply, so tests can play origin and proxy at once.

#![allow(dead_code)]

use authnet::base::neterror::NetError;
use authnet::socket::transport::{
    Endpoint, ResponseHead, Timeouts, Transport, TransportBody, TransportRequest,
    TransportSession,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route session logs through the test harness; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// What the scripted peer answers.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
    error: Option<NetError>,
    delay: Option<Duration>,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            error: None,
            delay: None,
        }
    }

    pub fn ok(body: &'static str) -> Self {
        Self::status(200).body(body)
    }

    /// Fail the write instead of answering.
    pub fn error(error: NetError) -> Self {
        Self {
            error: Some(error),
            ..Self::status(0)
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Hold the answer back so concurrent sessions interleave.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn body(mut self, body: &'static str) -> Self {
        self.body = Bytes::from_static(body.as_bytes());
        self
    }
}

/// One request as the peer saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub connection: usize,
    pub endpoint: Endpoint,
    pub tunneled: bool,
    pub method: Method,
    pub target: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub streaming: bool,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug, Default)]
pub struct Log {
    pub connects: Vec<Endpoint>,
    pub requests: Vec<Recorded>,
    pub tunnels: Vec<(String, u16)>,
}

type Handler = dyn Fn(&Recorded) -> Reply + Send + Sync;

#[derive(Clone)]
pub struct MockTransport {
    handler: Arc<Handler>,
    log: Arc<Mutex<Log>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        init_tracing();
        Self {
            handler: Arc::new(handler),
            log: Arc::new(Mutex::new(Log::default())),
        }
    }

    /// Replies in order, ignoring the requests. The last reply repeats.
    pub fn script(replies: Vec<Reply>) -> Self {
        let next = AtomicUsize::new(0);
        Self::new(move |_| {
            let i = next.fetch_add(1, Ordering::SeqCst).min(replies.len() - 1);
            replies[i].clone()
        })
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().requests.clone()
    }

    pub fn connects(&self) -> Vec<Endpoint> {
        self.log.lock().unwrap().connects.clone()
    }

    pub fn tunnels(&self) -> Vec<(String, u16)> {
        self.log.lock().unwrap().tunnels.clone()
    }
}

impl Transport for MockTransport {
    fn connect<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        _timeouts: &'a Timeouts,
    ) -> BoxFuture<'a, Result<Box<dyn TransportSession>, NetError>> {
        let connection = {
            let mut log = self.log.lock().unwrap();
            log.connects.push(endpoint.clone());
            log.connects.len() - 1
        };
        let session = MockSession {
            connection,
            endpoint: endpoint.clone(),
            tunneled: false,
            handler: Arc::clone(&self.handler),
            log: Arc::clone(&self.log),
            pending: None,
            keep_alive: true,
            closed: false,
        };
        Box::pin(async move { Ok(Box::new(session) as Box<dyn TransportSession>) })
    }
}

struct MockSession {
    connection: usize,
    endpoint: Endpoint,
    tunneled: bool,
    handler: Arc<Handler>,
    log: Arc<Mutex<Log>>,
    pending: Option<Bytes>,
    keep_alive: bool,
    closed: bool,
}

impl TransportSession for MockSession {
    fn send(&mut self, request: TransportRequest) -> BoxFuture<'_, Result<ResponseHead, NetError>> {
        let (body, streaming) = match request.body {
            TransportBody::Empty => (None, false),
            TransportBody::Full(bytes) => (Some(bytes), false),
            TransportBody::Stream(_) => (None, true),
        };
        let recorded = Recorded {
            connection: self.connection,
            endpoint: self.endpoint.clone(),
            tunneled: self.tunneled,
            method: request.method,
            target: request.target,
            headers: request.headers,
            body,
            streaming,
        };
        let reply = (self.handler)(&recorded);
        self.log.lock().unwrap().requests.push(recorded);
        let delay = reply.delay;

        let result = match reply.error {
            Some(error) => {
                self.closed = true;
                Err(error)
            }
            None => {
                let mut headers = HeaderMap::new();
                for (name, value) in &reply.headers {
                    headers.append(
                        HeaderName::from_bytes(name.as_bytes()).unwrap(),
                        HeaderValue::from_str(value).unwrap(),
                    );
                }
                if headers
                    .get(http::header::CONNECTION)
                    .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"close"))
                {
                    self.keep_alive = false;
                }
                self.pending = Some(reply.body);
                Ok(ResponseHead {
                    status: StatusCode::from_u16(reply.status).unwrap(),
                    headers,
                })
            }
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn read_body(&mut self) -> BoxFuture<'_, Result<Bytes, NetError>> {
        let body = self.pending.take().unwrap_or_default();
        Box::pin(async move { Ok(body) })
    }

    fn establish_tunnel<'a>(
        &'a mut self,
        host: &'a str,
        port: u16,
        _tls: bool,
    ) -> BoxFuture<'a, Result<(), NetError>> {
        self.pending = None;
        self.tunneled = true;
        self.log.lock().unwrap().tunnels.push((host.to_string(), port));
        Box::pin(async { Ok(()) })
    }

    fn is_reusable(&self) -> bool {
        !self.closed && self.keep_alive && self.pending.is_none()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Parse `key=value` pairs of an auth header after its scheme.
pub fn auth_params(header: &str) -> Vec<(String, String)> {
    let rest = header.split_once(' ').map(|(_, r)| r).unwrap_or("");
    let mut params = Vec::new();
    let mut chars = rest.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(' ' | ',')) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }
        let value = if chars.peek() == Some(&'"') {
            chars.next();
            chars.by_ref().take_while(|c| *c != '"').collect()
        } else {
            chars.by_ref().take_while(|c| *c != ',').collect::<String>().trim().to_string()
        };
        params.push((key.trim().to_ascii_lowercase(), value));
    }
    params
}

pub fn auth_param(header: &str, name: &str) -> Option<String> {
    auth_params(header)
        .into_iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v)
}

fn md5_hex(input: &str) -> String {
    let digest = boring::hash::hash(boring::hash::MessageDigest::md5(), input.as_bytes()).unwrap();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Check an MD5 `qop=auth` Digest answer the way a server would.
pub fn digest_is_valid(header: &str, username: &str, password: &str, method: &str) -> bool {
    let get = |name: &str| auth_param(header, name).unwrap_or_default();
    if get("username") != username {
        return false;
    }
    let ha1 = md5_hex(&format!("{}:{}:{}", username, get("realm"), password));
    let ha2 = md5_hex(&format!("{}:{}", method, get("uri")));
    let expected = md5_hex(&format!(
        "{}:{}:{}:{}:auth:{}",
        ha1,
        get("nonce"),
        get("nc"),
        get("cnonce"),
        ha2
    ));
    get("response") == expected
}
