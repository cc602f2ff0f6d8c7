//! NTLM, Kerberos and Negotiate (SPNEGO) authentication.
//!
//! Token generation is delegated to a platform security library through
//! [`SecurityContextProvider`]. This module only carries tokens between the
//! wire (`Negotiate <base64>`) and the context, one leg per challenge.

use crate::base::neterror::NetError;
use crate::http::authcache::AuthScheme;
use crate::http::authentry::Credentials;
use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// One in-progress security handshake.
pub trait SecurityContext: Send {
    /// Initial token sent in answer to a bare challenge.
    fn first_token(&mut self) -> Result<Vec<u8>, NetError>;

    /// Answer to a server continuation token.
    fn next_token(&mut self, server_token: &[u8]) -> Result<Vec<u8>, NetError>;
}

/// Factory for security contexts, typically backed by SSPI or GSS-API.
pub trait SecurityContextProvider: Send + Sync {
    /// Start a handshake with `host`. `credentials` is `None` for transparent logon.
    fn new_context(
        &self,
        host: &str,
        scheme: AuthScheme,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn SecurityContext>, NetError>;

    /// Whether a context can be created from the logged-in user without a prompt.
    fn supports_transparent(&self) -> bool {
        false
    }
}

/// Which two-stage schemes this client can speak.
#[derive(Clone, Default)]
pub struct AuthCapabilities {
    ntlm: Option<Arc<dyn SecurityContextProvider>>,
    negotiate: Option<Arc<dyn SecurityContextProvider>>,
}

impl fmt::Debug for AuthCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCapabilities")
            .field("ntlm", &self.ntlm.is_some())
            .field("negotiate", &self.negotiate.is_some())
            .finish()
    }
}

impl AuthCapabilities {
    pub fn with_ntlm(mut self, provider: Arc<dyn SecurityContextProvider>) -> Self {
        self.ntlm = Some(provider);
        self
    }

    /// Provider used for both Negotiate and Kerberos challenges.
    pub fn with_negotiate(mut self, provider: Arc<dyn SecurityContextProvider>) -> Self {
        self.negotiate = Some(provider);
        self
    }

    pub fn provider_for(&self, scheme: AuthScheme) -> Option<&Arc<dyn SecurityContextProvider>> {
        match scheme {
            AuthScheme::Ntlm => self.ntlm.as_ref(),
            AuthScheme::Negotiate | AuthScheme::Kerberos => self.negotiate.as_ref(),
            AuthScheme::Basic | AuthScheme::Digest => None,
        }
    }

    pub fn supports(&self, scheme: AuthScheme) -> bool {
        match scheme {
            AuthScheme::Basic | AuthScheme::Digest => true,
            _ => self.provider_for(scheme).is_some(),
        }
    }
}

/// One session's handshake: the provider and credentials, plus the live
/// context between legs. Cached entries hand out forks, never the live one.
pub struct NegotiateHandle {
    provider: Arc<dyn SecurityContextProvider>,
    host: String,
    scheme: AuthScheme,
    credentials: Option<Credentials>,
    context: Mutex<Option<Box<dyn SecurityContext>>>,
}

impl fmt::Debug for NegotiateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiateHandle")
            .field("host", &self.host)
            .field("scheme", &self.scheme)
            .field("transparent", &self.credentials.is_none())
            .finish()
    }
}

impl NegotiateHandle {
    pub fn new(
        provider: Arc<dyn SecurityContextProvider>,
        host: impl Into<String>,
        scheme: AuthScheme,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            provider,
            host: host.into(),
            scheme,
            credentials,
            context: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Same provider, scheme and credentials with no handshake in progress.
    pub fn fork(&self) -> Self {
        Self::new(
            Arc::clone(&self.provider),
            self.host.clone(),
            self.scheme,
            self.credentials.clone(),
        )
    }

    /// Produce the header value for one leg of the handshake.
    ///
    /// Without a server token a fresh context is started; with one, the
    /// current context continues.
    pub fn respond(&self, server_token: Option<&str>) -> Result<String, NetError> {
        let mut slot = self.context.lock().unwrap_or_else(PoisonError::into_inner);
        let token = match server_token {
            None => {
                let mut context =
                    self.provider
                        .new_context(&self.host, self.scheme, self.credentials.as_ref())?;
                let token = context.first_token()?;
                *slot = Some(context);
                token
            }
            Some(encoded) => {
                let decoded = general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|_| NetError::InvalidAuthChallenge)?;
                let context = slot
                    .as_mut()
                    .ok_or(NetError::UnexpectedSecurityLibraryStatus)?;
                context.next_token(&decoded)?
            }
        };
        tracing::trace!(host = %self.host, scheme = %self.scheme, len = token.len(), "Security token produced");
        Ok(format!(
            "{} {}",
            self.scheme.as_str(),
            general_purpose::STANDARD.encode(token)
        ))
    }

    /// Feed a final mutual-authentication token from a successful response.
    pub fn complete(&self, server_token: &str) -> Result<(), NetError> {
        self.respond(Some(server_token)).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoContext {
        legs: Arc<AtomicUsize>,
    }

    impl SecurityContext for EchoContext {
        fn first_token(&mut self) -> Result<Vec<u8>, NetError> {
            self.legs.fetch_add(1, Ordering::SeqCst);
            Ok(b"first".to_vec())
        }

        fn next_token(&mut self, server_token: &[u8]) -> Result<Vec<u8>, NetError> {
            self.legs.fetch_add(1, Ordering::SeqCst);
            let mut out = b"re:".to_vec();
            out.extend_from_slice(server_token);
            Ok(out)
        }
    }

    struct EchoProvider {
        contexts: AtomicUsize,
        legs: Arc<AtomicUsize>,
    }

    impl SecurityContextProvider for EchoProvider {
        fn new_context(
            &self,
            _host: &str,
            _scheme: AuthScheme,
            _credentials: Option<&Credentials>,
        ) -> Result<Box<dyn SecurityContext>, NetError> {
            self.contexts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoContext {
                legs: Arc::clone(&self.legs),
            }))
        }
    }

    fn provider() -> Arc<EchoProvider> {
        Arc::new(EchoProvider {
            contexts: AtomicUsize::new(0),
            legs: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[test]
    fn test_two_legs() {
        let p = provider();
        let handle = NegotiateHandle::new(p.clone(), "intranet", AuthScheme::Negotiate, None);

        let first = handle.respond(None).unwrap();
        assert_eq!(first, format!("Negotiate {}", general_purpose::STANDARD.encode("first")));

        let server = general_purpose::STANDARD.encode("srv");
        let second = handle.respond(Some(&server)).unwrap();
        assert_eq!(second, format!("Negotiate {}", general_purpose::STANDARD.encode("re:srv")));

        assert_eq!(p.contexts.load(Ordering::SeqCst), 1);
        assert_eq!(p.legs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_bare_challenge_restarts_context() {
        let p = provider();
        let handle = NegotiateHandle::new(p.clone(), "h", AuthScheme::Ntlm, None);
        handle.respond(None).unwrap();
        handle.respond(None).unwrap();
        assert_eq!(p.contexts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_continuation_without_context_fails() {
        let handle = NegotiateHandle::new(provider(), "h", AuthScheme::Kerberos, None);
        assert_eq!(
            handle.respond(Some("c3J2")),
            Err(NetError::UnexpectedSecurityLibraryStatus)
        );
    }

    #[test]
    fn test_invalid_base64_token() {
        let handle = NegotiateHandle::new(provider(), "h", AuthScheme::Negotiate, None);
        handle.respond(None).unwrap();
        assert_eq!(handle.respond(Some("!!!")), Err(NetError::InvalidAuthChallenge));
    }

    #[test]
    fn test_fork_has_independent_context() {
        let p = provider();
        let original = NegotiateHandle::new(p.clone(), "h", AuthScheme::Ntlm, None);
        original.respond(None).unwrap();

        let forked = original.fork();
        assert_eq!(
            forked.respond(Some("c3J2")),
            Err(NetError::UnexpectedSecurityLibraryStatus)
        );
        forked.respond(None).unwrap();
        original.respond(Some("c3J2")).unwrap();
        assert_eq!(p.contexts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_capabilities() {
        let caps = AuthCapabilities::default();
        assert!(caps.supports(AuthScheme::Basic));
        assert!(!caps.supports(AuthScheme::Ntlm));

        let caps = caps.with_negotiate(provider());
        assert!(caps.supports(AuthScheme::Kerberos));
        assert!(caps.supports(AuthScheme::Negotiate));
        assert!(!caps.supports(AuthScheme::Ntlm));
    }
}
