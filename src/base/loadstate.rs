/// The current state of a request.
/// This roughly matches net/base/load_states.h
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// The request is idle.
    #[default]
    Idle,

    /// Waiting for a credential provider to answer an auth challenge.
    WaitingForDelegate,

    /// Establishing proxy tunnel.
    EstablishingProxyTunnel,

    /// Connecting to the host (TCP handshake).
    Connecting,

    /// Sending the HTTP request.
    SendingRequest,

    /// Waiting for the server response (TTFB).
    WaitingForResponse,

    /// Reading the response body.
    ReadingResponse,
}
