use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::client::SocketType;
use crate::socket::transport::{Endpoint, Timeouts};
use boring::ssl::{SslConnector, SslMethod};
use tokio::net::TcpStream;

/// Manages the connection process: DNS -> TCP -> TLS.
/// Roughly equivalent to net::ConnectJob.
pub struct ConnectJob;

impl ConnectJob {
    /// Open a connection to `endpoint`, honoring the connect timeout.
    pub async fn connect(endpoint: &Endpoint, timeouts: &Timeouts) -> Result<SocketType, NetError> {
        let job = Self::connect_inner(endpoint);
        match timeouts.connect {
            Some(limit) => tokio::time::timeout(limit, job)
                .await
                .map_err(|_| NetError::ConnectionTimedOut)?,
            None => job.await,
        }
    }

    async fn connect_inner(endpoint: &Endpoint) -> Result<SocketType, NetError> {
        let host = endpoint.host.trim_start_matches('[').trim_end_matches(']');

        // 1. DNS Resolution
        let addrs: Vec<_> = tokio::net::lookup_host((host, endpoint.port))
            .await
            .dns_context(host)?
            .collect();
        if addrs.is_empty() {
            return Err(NetError::NameNotResolved);
        }

        // 2. TCP Connect, first address that answers
        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(e).connection_context(host, endpoint.port),
            (None, None) => return Err(NetError::ConnectionFailed),
        };
        let _ = stream.set_nodelay(true);
        tracing::debug!(endpoint = %endpoint, "TCP connected");

        // 3. TLS Handshake
        let socket = SocketType::Tcp(stream);
        if endpoint.tls {
            Self::start_tls(socket, host).await
        } else {
            Ok(socket)
        }
    }

    /// Run a TLS handshake for `host` over an existing socket (direct or tunneled).
    pub async fn start_tls(socket: SocketType, host: &str) -> Result<SocketType, NetError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;

        // The session speaks HTTP/1.1 only.
        builder
            .set_alpn_protos(b"\x08http/1.1")
            .map_err(|_| NetError::SslProtocolError)?;

        let connector = builder.build();
        let config = connector
            .configure()
            .map_err(|_| NetError::SslProtocolError)?;

        let tls_stream = tokio_boring::connect(config, host, socket)
            .await
            .map_err(|e| {
                tracing::warn!(host, error = ?e, "TLS handshake failed");
                NetError::SslProtocolError
            })?;

        Ok(SocketType::Ssl(Box::new(tls_stream)))
    }
}
