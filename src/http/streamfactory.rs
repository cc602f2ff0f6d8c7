use crate::base::neterror::NetError;
use crate::socket::client::SocketType;
use crate::socket::connectjob::ConnectJob;
use crate::socket::transport::{
    Endpoint, ResponseHead, Timeouts, Transport, TransportBody, TransportRequest,
    TransportSession,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::TryStreamExt;
use http::{Request, Response};
use http_body::Frame;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::task::JoinHandle;

type OutgoingBody = UnsyncBoxBody<Bytes, NetError>;

/// One HTTP/1.1 connection driven by hyper.
/// Equivalent to net::HttpStream.
pub struct HttpStream {
    sender: http1::SendRequest<OutgoingBody>,
    driver: JoinHandle<()>,
    read_timeout: Option<Duration>,
    /// Last response, kept until its body is read or the connection is upgraded.
    pending: Option<Response<Incoming>>,
    closed: bool,
}

impl HttpStream {
    async fn handshake(socket: SocketType, read_timeout: Option<Duration>) -> Result<Self, NetError> {
        let io = TokioIo::new(socket);
        let (sender, conn) = http1::handshake(io).await.map_err(map_hyper_error)?;

        // Upgrades are needed so a CONNECT response can hand the socket back.
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!(error = %e, "Connection driver ended");
            }
        });

        Ok(Self {
            sender,
            driver,
            read_timeout,
            pending: None,
            closed: false,
        })
    }

    fn build_request(request: TransportRequest) -> Result<Request<OutgoingBody>, NetError> {
        let body: OutgoingBody = match request.body {
            TransportBody::Empty => Empty::<Bytes>::new()
                .map_err(|never| match never {})
                .boxed_unsync(),
            TransportBody::Full(bytes) => Full::new(bytes)
                .map_err(|never| match never {})
                .boxed_unsync(),
            TransportBody::Stream(chunks) => {
                StreamBody::new(chunks.map_ok(Frame::data)).boxed_unsync()
            }
        };

        let mut req = Request::builder()
            .method(request.method)
            .uri(request.target.as_str())
            .body(body)
            .map_err(|_| NetError::InvalidUrl)?;
        *req.headers_mut() = request.headers;
        Ok(req)
    }
}

async fn with_read_timeout<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T, NetError>>,
) -> Result<T, NetError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| NetError::ConnectionTimedOut)?,
        None => fut.await,
    }
}

/// Classify a hyper failure so retry logic can tell dead connections apart.
fn map_hyper_error(err: hyper::Error) -> NetError {
    if err.is_timeout() {
        return NetError::ConnectionTimedOut;
    }
    if err.is_incomplete_message() {
        return NetError::EmptyResponse;
    }
    if err.is_canceled() || err.is_closed() {
        return NetError::ConnectionClosed;
    }
    if err.is_parse() || err.is_parse_status() {
        return NetError::InvalidResponse;
    }

    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(net) = cause.downcast_ref::<NetError>() {
            return net.clone();
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => {
                    NetError::ConnectionReset
                }
                io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
                io::ErrorKind::NotConnected => NetError::SocketNotConnected,
                io::ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
                io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
                _ => NetError::ConnectionFailed,
            };
        }
        source = cause.source();
    }
    tracing::debug!(error = %err, "Unclassified HTTP error");
    NetError::ConnectionFailed
}

impl TransportSession for HttpStream {
    fn send(&mut self, request: TransportRequest) -> BoxFuture<'_, Result<ResponseHead, NetError>> {
        Box::pin(async move {
            self.pending = None;
            let req = Self::build_request(request)?;
            self.sender.ready().await.map_err(map_hyper_error)?;

            let read_timeout = self.read_timeout;
            let fut = self.sender.send_request(req);
            let resp = with_read_timeout(read_timeout, async {
                fut.await.map_err(map_hyper_error)
            })
            .await?;

            let head = ResponseHead {
                status: resp.status(),
                headers: resp.headers().clone(),
            };
            self.pending = Some(resp);
            Ok(head)
        })
    }

    fn read_body(&mut self) -> BoxFuture<'_, Result<Bytes, NetError>> {
        Box::pin(async move {
            let Some(resp) = self.pending.take() else {
                return Ok(Bytes::new());
            };
            with_read_timeout(self.read_timeout, async {
                let collected = resp
                    .into_body()
                    .collect()
                    .await
                    .map_err(map_hyper_error)?;
                Ok(collected.to_bytes())
            })
            .await
        })
    }

    fn establish_tunnel<'a>(
        &'a mut self,
        host: &'a str,
        _port: u16,
        tls: bool,
    ) -> BoxFuture<'a, Result<(), NetError>> {
        Box::pin(async move {
            let resp = self.pending.take().ok_or(NetError::TunnelConnectionFailed)?;
            let upgraded = hyper::upgrade::on(resp).await.map_err(|e| {
                tracing::warn!(host, error = %e, "Proxy did not hand over the connection");
                NetError::TunnelConnectionFailed
            })?;

            let mut socket = SocketType::Tunnel(TokioIo::new(upgraded));
            if tls {
                socket = ConnectJob::start_tls(socket, host).await?;
            }
            let tunneled = Self::handshake(socket, self.read_timeout).await?;
            self.driver.abort();
            *self = tunneled;
            Ok(())
        })
    }

    fn is_reusable(&self) -> bool {
        !self.closed && self.pending.is_none() && !self.sender.is_closed()
    }

    fn close(&mut self) {
        self.closed = true;
        self.pending = None;
        self.driver.abort();
    }
}

/// Opens hyper-backed HTTP/1.1 connections.
#[derive(Debug, Default, Clone)]
pub struct HttpStreamFactory;

impl HttpStreamFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for HttpStreamFactory {
    fn connect<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        timeouts: &'a Timeouts,
    ) -> BoxFuture<'a, Result<Box<dyn TransportSession>, NetError>> {
        Box::pin(async move {
            let socket = ConnectJob::connect(endpoint, timeouts).await?;
            let stream = HttpStream::handshake(socket, timeouts.read).await?;
            Ok(Box::new(stream) as Box<dyn TransportSession>)
        })
    }
}
