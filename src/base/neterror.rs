use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {reason}")]
    ConnectionFailedTo { host: String, port: u16, reason: String },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Could not resolve {domain}: {reason}")]
    NameNotResolvedFor { domain: String, reason: String },
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("Tunnel connection failed")]
    TunnelConnectionFailed,
    #[error("Proxy auth unsupported")]
    ProxyAuthUnsupported,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Proxy auth requested")]
    ProxyAuthRequested,
    #[error("Proxy connection failed")]
    ProxyConnectionFailed,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,
    #[error("Invalid redirect")]
    InvalidRedirect,
    #[error("Too many redirects")]
    TooManyRedirects,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Unexpected proxy auth")]
    UnexpectedProxyAuth,
    #[error("Empty response")]
    EmptyResponse,
    #[error("No supported proxies")]
    NoSupportedProxies,
    #[error("Invalid auth credentials")]
    InvalidAuthCredentials,
    #[error("Unsupported auth scheme")]
    UnsupportedAuthScheme,
    #[error("Missing auth credentials")]
    MissingAuthCredentials,
    #[error("Unexpected security library status")]
    UnexpectedSecurityLibraryStatus,

    // Auth negotiation and status errors (custom codes starting at -10000)
    #[error("Authentication failed (HTTP {status})")]
    AuthenticationFailed { status: u16 },
    #[error("Cannot retry streamed request body (HTTP {status})")]
    StreamingRetry { status: u16 },
    #[error("Server returned HTTP response code {status}")]
    HttpStatus { status: u16 },
    #[error("Resource not found (HTTP {status})")]
    NotFound { status: u16 },
    #[error("Authentication-Info response digest invalid")]
    AuthResponseInvalid,
    #[error("Malformed authentication challenge")]
    InvalidAuthChallenge,
    #[error("Invalid header")]
    InvalidHeader,
    #[error("HTTP body error")]
    HttpBodyError,
    #[error("Invalid UTF-8 in body")]
    InvalidUtf8,
    #[error("JSON parse error")]
    JsonParseError,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed | NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved | NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::TunnelConnectionFailed => -111,
            NetError::SocketNotConnected => -112,
            NetError::ProxyAuthUnsupported => -115,
            NetError::ConnectionTimedOut => -118,
            NetError::ProxyAuthRequested => -127,
            NetError::ProxyConnectionFailed => -130,

            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme => -302,
            NetError::InvalidRedirect => -303,
            NetError::TooManyRedirects => -310,
            NetError::InvalidResponse => -320,
            NetError::UnexpectedProxyAuth => -323,
            NetError::EmptyResponse => -324,
            NetError::NoSupportedProxies => -336,
            NetError::InvalidAuthCredentials => -338,
            NetError::UnsupportedAuthScheme => -339,
            NetError::MissingAuthCredentials => -341,
            NetError::UnexpectedSecurityLibraryStatus => -342,

            NetError::AuthenticationFailed { .. } => -10000,
            NetError::StreamingRetry { .. } => -10001,
            NetError::HttpStatus { .. } => -10002,
            NetError::NotFound { .. } => -10003,
            NetError::AuthResponseInvalid => -10004,
            NetError::InvalidAuthChallenge => -10005,
            NetError::InvalidHeader => -10006,
            NetError::HttpBodyError => -10007,
            NetError::InvalidUtf8 => -10008,
            NetError::JsonParseError => -10009,
            NetError::Unknown(code) => *code,
        }
    }

    /// Helper for `IoResultExt::connection_context`.
    pub fn connection_failed_to(host: &str, port: u16, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            _ => NetError::ConnectionFailedTo {
                host: host.to_string(),
                port,
                reason: err.to_string(),
            },
        }
    }

    /// Helper for `IoResultExt::dns_context`.
    pub fn dns_failed(domain: &str, err: std::io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            reason: err.to_string(),
        }
    }

    /// HTTP status carried by status-bearing errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            NetError::AuthenticationFailed { status }
            | NetError::StreamingRetry { status }
            | NetError::HttpStatus { status }
            | NetError::NotFound { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -107 => NetError::SslProtocolError,
            -111 => NetError::TunnelConnectionFailed,
            -112 => NetError::SocketNotConnected,
            -115 => NetError::ProxyAuthUnsupported,
            -118 => NetError::ConnectionTimedOut,
            -127 => NetError::ProxyAuthRequested,
            -130 => NetError::ProxyConnectionFailed,

            -300 => NetError::InvalidUrl,
            -302 => NetError::UnknownUrlScheme,
            -303 => NetError::InvalidRedirect,
            -310 => NetError::TooManyRedirects,
            -320 => NetError::InvalidResponse,
            -323 => NetError::UnexpectedProxyAuth,
            -324 => NetError::EmptyResponse,
            -336 => NetError::NoSupportedProxies,
            -338 => NetError::InvalidAuthCredentials,
            -339 => NetError::UnsupportedAuthScheme,
            -341 => NetError::MissingAuthCredentials,
            -342 => NetError::UnexpectedSecurityLibraryStatus,

            // Status-bearing variants lose their status across the integer form.
            -10000 => NetError::AuthenticationFailed { status: 0 },
            -10001 => NetError::StreamingRetry { status: 0 },
            -10002 => NetError::HttpStatus { status: 0 },
            -10003 => NetError::NotFound { status: 0 },
            -10004 => NetError::AuthResponseInvalid,
            -10005 => NetError::InvalidAuthChallenge,
            -10006 => NetError::InvalidHeader,
            -10007 => NetError::HttpBodyError,
            -10008 => NetError::InvalidUtf8,
            -10009 => NetError::JsonParseError,
            _ => NetError::Unknown(code),
        }
    }
}
