//! Which transport failures justify resending a request.
//!
//! Based on Chromium's `HttpNetworkTransaction::RetryReason`.
//! See: net/http/http_network_transaction.h
//!
//! A session resends at most once, on a fresh connection, and only when the
//! body can be replayed.

use crate::base::neterror::NetError;

/// Reasons for retrying a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Server closed connection unexpectedly
    ConnectionReset,
    /// Connection was closed during request
    ConnectionClosed,
    /// Connection was aborted
    ConnectionAborted,
    /// Socket not connected
    SocketNotConnected,
    /// Empty response received
    EmptyResponse,
    /// Read deadline passed while waiting for the response
    HttpRequestTimeout,
}

impl RetryReason {
    /// Map a NetError to a RetryReason, if the error is retryable.
    pub fn from_error(error: &NetError) -> Option<Self> {
        match error {
            NetError::ConnectionReset => Some(Self::ConnectionReset),
            NetError::ConnectionClosed => Some(Self::ConnectionClosed),
            NetError::ConnectionAborted => Some(Self::ConnectionAborted),
            NetError::SocketNotConnected => Some(Self::SocketNotConnected),
            NetError::EmptyResponse => Some(Self::EmptyResponse),
            NetError::ConnectionTimedOut => Some(Self::HttpRequestTimeout),
            _ => None,
        }
    }
}

/// Whether a failed exchange may be resent.
///
/// `failed_once` is set after the first resend; `replayable` is false for
/// streaming bodies that were already handed to the wire.
pub fn should_retry(error: &NetError, failed_once: bool, replayable: bool) -> bool {
    !failed_once && replayable && RetryReason::from_error(error).is_some()
}
