//! Connections.
//!
//! - [`transport`]: the seam sessions talk to (`Transport`, `TransportSession`)
//! - [`connectjob`]: TCP → TLS connection flow
//! - [`client`]: the socket types a connection runs over
//! - [`proxy`]: HTTP proxy settings and `NO_PROXY` rules ([`matcher`])

pub mod client;
pub mod connectjob;
pub mod matcher;
pub mod proxy;
pub mod transport;
