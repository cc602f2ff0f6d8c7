//! HTTP authentication and the connection session.
//!
//! - [`authcache`]: credential cache keyed by protection space, realm-request serialization
//! - [`authchallenge`]: `WWW-Authenticate` / `Proxy-Authenticate` parsing and scheme selection
//! - [`authentry`]: cached credentials per scheme and their header values
//! - [`basicauth`], [`digestauth`], [`negotiateauth`]: the schemes
//! - [`transaction`]: [`ConnectionSession`], the retry/redirect/tunnel state machine

pub mod authcache;
pub mod authchallenge;
pub mod authentry;
pub mod authprompt;
pub mod basicauth;
pub mod digestauth;
pub mod httpcache;
pub mod negotiateauth;
pub mod orderedheaders;
pub mod redirect;
pub mod requestbody;
pub mod response;
pub mod retry;
pub mod streamfactory;
pub mod transaction;
pub mod tunnel;

// Re-exports for convenience
pub use authcache::{AuthScheme, AuthTarget, CredentialCache};
pub use authentry::{CredentialEntry, Credentials, ProtectionSpace};
pub use authprompt::{CredentialProvider, CredentialRequest, StaticCredentialProvider};
pub use orderedheaders::OrderedHeaderMap;
pub use requestbody::RequestBody;
pub use response::HttpResponse;
pub use transaction::{ConnectionSession, SessionState};
