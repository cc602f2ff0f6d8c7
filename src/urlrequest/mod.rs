//! Shared state for sessions.

pub mod context;

pub use context::{SessionConfig, SessionContext, SessionContextBuilder};
