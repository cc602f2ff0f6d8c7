//! Request body for POST/PUT operations.
//!
//! Buffered bodies can be replayed on every retry. Streaming bodies are
//! written once; a response that would require resending one fails the
//! request instead.

use crate::base::neterror::NetError;
use crate::socket::transport::TransportBody;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;

/// How a streaming body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingMode {
    /// `Content-Length` known in advance.
    FixedLength(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

/// A body produced incrementally by the caller.
pub struct StreamingBody {
    mode: StreamingMode,
    chunks: Option<BoxStream<'static, Result<Bytes, NetError>>>,
}

impl StreamingBody {
    pub fn mode(&self) -> StreamingMode {
        self.mode
    }

    /// Hand the chunks to the wire. Returns `None` once they were consumed.
    fn take(&mut self) -> Option<BoxStream<'static, Result<Bytes, NetError>>> {
        self.chunks.take()
    }
}

impl fmt::Debug for StreamingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingBody")
            .field("mode", &self.mode)
            .field("consumed", &self.chunks.is_none())
            .finish()
    }
}

/// Request body for HTTP methods that send data.
#[derive(Debug, Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Buffered bytes, replayable.
    Bytes(Bytes),
    /// Caller-driven stream, sent at most once.
    Streaming(StreamingBody),
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Bytes(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl RequestBody {
    /// Streaming body with a declared length.
    pub fn fixed_length<S>(length: u64, chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, NetError>> + Send + 'static,
    {
        RequestBody::Streaming(StreamingBody {
            mode: StreamingMode::FixedLength(length),
            chunks: Some(chunks.boxed()),
        })
    }

    /// Streaming body sent with chunked transfer encoding.
    pub fn chunked<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, NetError>> + Send + 'static,
    {
        RequestBody::Streaming(StreamingBody {
            mode: StreamingMode::Chunked,
            chunks: Some(chunks.boxed()),
        })
    }

    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Length when known up front.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Bytes(b) => Some(b.len() as u64),
            RequestBody::Streaming(s) => match s.mode {
                StreamingMode::FixedLength(len) => Some(len),
                StreamingMode::Chunked => None,
            },
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, RequestBody::Streaming(_))
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, RequestBody::Streaming(s) if s.mode == StreamingMode::Chunked)
    }

    /// Whether the body can be sent again after a failed attempt.
    pub fn is_replayable(&self) -> bool {
        !self.is_streaming()
    }

    /// Produce the wire body for one attempt.
    pub(crate) fn to_transport(&mut self) -> Result<TransportBody, NetError> {
        match self {
            RequestBody::Empty => Ok(TransportBody::Empty),
            RequestBody::Bytes(b) => Ok(TransportBody::Full(b.clone())),
            RequestBody::Streaming(s) => s
                .take()
                .map(TransportBody::Stream)
                .ok_or(NetError::HttpBodyError),
        }
    }
}
