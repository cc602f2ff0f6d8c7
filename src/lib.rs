//! # authnet
//!
//! HTTP client authentication and connection negotiation.
//!
//! `authnet` answers `401` and `407` challenges the way a long-lived HTTP
//! client does: credentials are cached per protection space and reused
//! preemptively, Digest nonces are refreshed when they go stale, and the
//! two-leg NTLM / Negotiate handshakes run on a kept-alive connection.
//!
//! ## Features
//!
//! - **Credential Cache**: keyed by target, scheme, host, port and realm, with
//!   path-prefix lookup and optional one-prompt-per-realm serialization
//! - **Schemes**: Basic, Digest (MD5 / SHA-256, `qop=auth`, `-sess`), NTLM and
//!   Negotiate through pluggable security-context providers
//! - **Sessions**: redirects, `305 Use Proxy`, `CONNECT` tunnels for https
//!   through an HTTP proxy, one retry on dead keep-alive connections
//! - **Transport**: hyper HTTP/1.1 over tokio with BoringSSL TLS
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use authnet::Client;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::builder().credentials("alice", "secret").build();
//!     let response = client.get("http://example.com/private").send().await.unwrap();
//!     println!("Status: {}", response.status());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error and load-state definitions
//! - [`http`] - Authentication schemes, credential cache and sessions
//! - [`socket`] - Transport, proxies and TLS sockets
//! - [`urlrequest`] - Session configuration and shared context

pub mod base;
pub mod client;
pub mod http;
pub mod socket;
pub mod urlrequest;

pub use base::neterror::NetError;
pub use client::{Client, ClientBuilder, RequestBuilder};
pub use http::{ConnectionSession, HttpResponse};
pub use urlrequest::{SessionConfig, SessionContext};
