//! One logical request across reconnects, challenges and redirects.
//!
//! Chromium mapping: net/http/http_network_transaction.h, with the auth
//! controller and redirect handling folded into the same state machine.
//!
//! A session connects (directly, through an HTTP proxy, or through a
//! `CONNECT` tunnel for https targets), writes the request and reacts to the
//! response:
//!
//! - `407` / `401`: answer the challenge from the credential cache or the
//!   credential provider and resend. Expired Digest nonces are retried with
//!   the same credentials; rejected credentials are evicted.
//! - `3xx`: follow same-scheme redirects, `305` re-routes through a proxy.
//! - anything else: commit the credentials that worked and return.
//!
//! Every auth retry and redirect counts against `max_redirects`.

use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::http::authcache::{AuthScheme, AuthTarget, RealmGuard, RealmSlot};
use crate::http::authchallenge::{select_challenge, AuthChallenge};
use crate::http::authentry::{CredentialEntry, Credentials, ProtectionSpace, SchemePayload};
use crate::http::authprompt::CredentialRequest;
use crate::http::basicauth::{narrowed_path, reduce_path};
use crate::http::digestauth::{DigestChallenge, DigestParameters};
use crate::http::negotiateauth::NegotiateHandle;
use crate::http::orderedheaders::OrderedHeaderMap;
use crate::http::redirect::{self, RedirectAction};
use crate::http::requestbody::RequestBody;
use crate::http::response::HttpResponse;
use crate::http::retry;
use crate::http::tunnel::{connect_authority, Tunnel, TunnelState, PROXY_CONNECTION};
use crate::socket::proxy::ProxySettings;
use crate::socket::transport::{Endpoint, ResponseHead, TransportBody, TransportRequest, TransportSession};
use crate::urlrequest::context::SessionContext;
use bytes::Bytes;
use http::header::{
    HeaderValue, ACCEPT, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE,
    COOKIE, HOST, LOCATION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TRANSFER_ENCODING,
    USER_AGENT, WWW_AUTHENTICATE,
};
use http::{HeaderMap, Method, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::{Position, Url};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

const DEFAULT_ACCEPT: &str = "text/html, image/gif, image/jpeg, *; q=.2, */*; q=.2";

/// Session progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    EstablishingProxyTunnel,
    SendingRequest,
    WaitingForResponse,
    /// Resolving credentials for a challenge.
    AwaitingAuth,
    Redirecting,
    ReadingResponse,
    Complete,
    Failed,
}

impl SessionState {
    /// Map internal state to public LoadState.
    fn to_load_state(self) -> LoadState {
        match self {
            SessionState::Idle
            | SessionState::Redirecting
            | SessionState::Complete
            | SessionState::Failed => LoadState::Idle,
            SessionState::Connecting => LoadState::Connecting,
            SessionState::EstablishingProxyTunnel => LoadState::EstablishingProxyTunnel,
            SessionState::SendingRequest => LoadState::SendingRequest,
            SessionState::WaitingForResponse => LoadState::WaitingForResponse,
            SessionState::AwaitingAuth => LoadState::WaitingForDelegate,
            SessionState::ReadingResponse => LoadState::ReadingResponse,
        }
    }
}

/// Authentication progress against one target (origin or proxy).
#[derive(Debug, Default)]
struct AuthState {
    /// Entry whose header is currently applied.
    entry: Option<CredentialEntry>,
    header: Option<HeaderValue>,
    /// NTLM/Negotiate: the next challenge carries the server's token.
    second_stage: bool,
    /// A bare Negotiate challenge was answered in this exchange.
    in_negotiate: bool,
    tried_transparent: bool,
    /// The caller set the header; no preemptive credentials are added.
    user_supplied: bool,
    /// Credentials the target just refused.
    rejected: Option<Credentials>,
    /// Digest `domain` from the challenge that selected `entry`.
    digest_domain: Option<String>,
    slot: Option<RealmGuard>,
}

impl AuthState {
    fn reset(&mut self) {
        self.entry = None;
        self.header = None;
        self.second_stage = false;
        self.in_negotiate = false;
        self.rejected = None;
        self.digest_domain = None;
        self.slot = None;
    }
}

/// What to do after a response.
#[derive(Debug)]
enum Step {
    Done,
    Retry { reuse: bool },
    /// Give up, keeping the response for the caller.
    Fail(NetError),
}

/// Releases the session's resources when `start` ends, including when its
/// future is dropped mid-flight.
struct ActiveRun<'a> {
    session: &'a mut ConnectionSession,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.session.release();
    }
}

/// Drives one request to completion.
pub struct ConnectionSession {
    context: Arc<SessionContext>,
    id: u64,
    method: Method,
    url: Url,
    headers: OrderedHeaderMap,
    body: RequestBody,
    state: SessionState,
    proxy: Option<ProxySettings>,
    /// Proxy chosen by a `305`, kept across later redirects.
    proxy_from_redirect: bool,
    tunnel: Tunnel,
    connection: Option<Box<dyn TransportSession>>,
    redirects: u32,
    failed_once: bool,
    server_auth: AuthState,
    proxy_auth: AuthState,
    response: Option<HttpResponse>,
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("state", &self.state)
            .field("tunnel", &self.tunnel.state())
            .field("redirects", &self.redirects)
            .finish()
    }
}

impl ConnectionSession {
    pub fn new(context: Arc<SessionContext>, method: Method, url: Url) -> Self {
        Self {
            context,
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            method,
            url,
            headers: OrderedHeaderMap::new(),
            body: RequestBody::Empty,
            state: SessionState::Idle,
            proxy: None,
            proxy_from_redirect: false,
            tunnel: Tunnel::default(),
            connection: None,
            redirects: 0,
            failed_once: false,
            server_auth: AuthState::default(),
            proxy_auth: AuthState::default(),
            response: None,
        }
    }

    pub fn set_headers(&mut self, headers: OrderedHeaderMap) {
        self.headers = headers;
    }

    /// Add a header to the request.
    pub fn add_header(&mut self, key: &str, value: &str) -> Result<(), NetError> {
        self.headers.insert(key, value)
    }

    pub fn set_body(&mut self, body: RequestBody) {
        self.body = body;
    }

    pub fn headers(&self) -> &OrderedHeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get the current load state (for progress reporting).
    pub fn load_state(&self) -> LoadState {
        self.state.to_load_state()
    }

    pub fn tunnel_state(&self) -> TunnelState {
        self.tunnel.state()
    }

    /// Receiver that sees every tunnel transition, usable while `start` runs.
    pub fn watch_tunnel(&self) -> tokio::sync::watch::Receiver<TunnelState> {
        self.tunnel.subscribe()
    }

    /// Redirects and authentication retries so far.
    pub fn redirect_count(&self) -> u32 {
        self.redirects
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_ref()
    }

    /// Take the final response. Also available after an HTTP status error.
    pub fn take_response(&mut self) -> Option<HttpResponse> {
        self.response.take()
    }

    /// Run the request until a final response or a fatal error.
    ///
    /// Dropping the returned future releases any realm this session holds
    /// and closes its connection.
    pub async fn start(&mut self) -> Result<(), NetError> {
        self.server_auth.user_supplied = self.headers.contains(&AUTHORIZATION);
        self.proxy_auth.user_supplied = self.headers.contains(&PROXY_AUTHORIZATION);

        let active = ActiveRun { session: &mut *self };
        let result = active.session.run().await;
        drop(active);

        match &result {
            Ok(()) => self.state = SessionState::Complete,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Session failed");
                self.state = SessionState::Failed;
            }
        }
        result
    }

    async fn run(&mut self) -> Result<(), NetError> {
        self.proxy = self.context.proxy_for(&self.url);

        loop {
            if let Some(hit) = self.cached_response() {
                tracing::debug!(url = %self.url, "Served from response cache");
                self.response = Some(hit);
                return Ok(());
            }

            let head = self.exchange().await?;
            match self.handle_response(&head).await? {
                Step::Done => return self.finish(head).await,
                Step::Fail(err) => {
                    if let Ok(response) = self.read_response(head).await {
                        self.response = Some(response);
                    }
                    return Err(err);
                }
                Step::Retry { reuse } => {
                    self.redirects += 1;
                    let max = self.context.config().max_redirects;
                    if self.redirects > max {
                        tracing::warn!(url = %self.url, max, "Too many redirects");
                        return Err(NetError::TooManyRedirects);
                    }
                    self.prepare_connection(reuse).await;
                }
            }
        }
    }

    /// Connect if needed and send the request, resending once on a fresh
    /// connection when the failure looks like a dead keep-alive socket.
    async fn exchange(&mut self) -> Result<ResponseHead, NetError> {
        loop {
            match self.try_exchange().await {
                Ok(head) => return Ok(head),
                Err(e) if retry::should_retry(&e, self.failed_once, self.body.is_replayable()) => {
                    tracing::debug!(url = %self.url, error = %e, "Retrying on a fresh connection");
                    self.failed_once = true;
                    self.close_connection();
                }
                Err(e) => {
                    self.close_connection();
                    return Err(e);
                }
            }
        }
    }

    async fn try_exchange(&mut self) -> Result<ResponseHead, NetError> {
        self.ensure_connected().await?;
        self.apply_preemptive()?;
        let body = self.body.to_transport()?;
        let target = self.request_target();
        self.send_request(self.method.clone(), target, body).await
    }

    async fn ensure_connected(&mut self) -> Result<(), NetError> {
        if let Some(conn) = &self.connection {
            if conn.is_reusable() {
                return Ok(());
            }
            self.close_connection();
        }
        self.open_connection().await?;
        if self.proxy.is_some() && self.url.scheme() == "https" && !self.tunnel.is_tunneling() {
            self.establish_tunnel().await?;
        }
        Ok(())
    }

    async fn open_connection(&mut self) -> Result<(), NetError> {
        let endpoint = match &self.proxy {
            Some(proxy) => proxy.endpoint(),
            None => Endpoint::new(
                self.origin_host()?,
                self.origin_port()?,
                self.url.scheme() == "https",
            ),
        };
        self.state = SessionState::Connecting;
        tracing::debug!(endpoint = %endpoint, via_proxy = self.proxy.is_some(), "Connecting");

        let transport = Arc::clone(self.context.transport());
        let timeouts = self.context.config().timeouts;
        let conn = transport.connect(&endpoint, &timeouts).await?;
        self.connection = Some(conn);
        Ok(())
    }

    async fn establish_tunnel(&mut self) -> Result<(), NetError> {
        let host = self.origin_host()?;
        let port = self.origin_port()?;
        let authority = connect_authority(&host, port);
        let user_agent = HeaderValue::from_str(&self.context.config().user_agent).ok();

        self.state = SessionState::EstablishingProxyTunnel;
        self.tunnel.begin(&mut self.headers, &authority, user_agent.as_ref());
        match self.run_tunnel_setup(&authority, &host, port).await {
            Ok(()) => {
                self.tunnel.complete(&mut self.headers);
                Ok(())
            }
            Err(e) => {
                self.tunnel.abort(&mut self.headers);
                self.close_connection();
                Err(e)
            }
        }
    }

    async fn run_tunnel_setup(&mut self, authority: &str, host: &str, port: u16) -> Result<(), NetError> {
        let max = self.context.config().max_redirects;
        let mut attempts = 0u32;
        loop {
            if self.connection.is_none() {
                self.open_connection().await?;
            }
            self.apply_preemptive()?;
            let head = self
                .send_request(Method::CONNECT, authority.to_string(), TransportBody::Empty)
                .await?;

            if head.status.is_success() {
                if let Err(e) = self.validate_proof(AuthTarget::Proxy, &head) {
                    self.evict_applied(AuthTarget::Proxy);
                    return Err(e);
                }
                self.commit_auth(AuthTarget::Proxy);
                let conn = self.connection.as_mut().ok_or(NetError::SocketNotConnected)?;
                conn.establish_tunnel(host, port, true).await?;
                return Ok(());
            }
            if head.status != StatusCode::PROXY_AUTHENTICATION_REQUIRED {
                tracing::warn!(status = head.status.as_u16(), authority, "Proxy refused tunnel");
                return Err(NetError::TunnelConnectionFailed);
            }

            attempts += 1;
            if attempts > max {
                return Err(NetError::TunnelConnectionFailed);
            }
            match self.handle_challenge(AuthTarget::Proxy, &head).await? {
                Step::Retry { reuse } => self.prepare_connection(reuse).await,
                Step::Fail(e) => {
                    tracing::debug!(error = %e, "Proxy authentication failed while tunneling");
                    return Err(NetError::TunnelConnectionFailed);
                }
                Step::Done => return Err(NetError::TunnelConnectionFailed),
            }
        }
    }

    async fn send_request(
        &mut self,
        method: Method,
        target: String,
        body: TransportBody,
    ) -> Result<ResponseHead, NetError> {
        let headers = self.wire_headers();
        self.state = SessionState::SendingRequest;
        tracing::debug!(session = self.id, method = %method, target = %target, "Sending request");

        let conn = self.connection.as_mut().ok_or(NetError::SocketNotConnected)?;
        let pending = conn.send(TransportRequest {
            method,
            target,
            headers,
            body,
        });
        self.state = SessionState::WaitingForResponse;
        let head = pending.await?;
        tracing::debug!(session = self.id, status = head.status.as_u16(), "Response received");
        Ok(head)
    }

    /// Keep the connection for the next leg when asked and possible.
    async fn prepare_connection(&mut self, reuse: bool) {
        if reuse {
            if let Some(conn) = self.connection.as_mut() {
                if conn.read_body().await.is_ok() && conn.is_reusable() {
                    return;
                }
            }
        }
        self.close_connection();
    }

    /// Give back the connection and any realm slots.
    fn release(&mut self) {
        if self.tunnel.state() == TunnelState::Setup {
            self.tunnel.abort(&mut self.headers);
        }
        self.close_connection();
        self.server_auth.slot = None;
        self.proxy_auth.slot = None;
    }

    fn close_connection(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.close();
        }
        if self.tunnel.is_tunneling() {
            self.tunnel.reset();
        }
    }

    async fn handle_response(&mut self, head: &ResponseHead) -> Result<Step, NetError> {
        let status = head.status;

        if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
            if self.proxy.is_none() || self.tunnel.is_tunneling() {
                return Err(NetError::UnexpectedProxyAuth);
            }
            return self.handle_challenge(AuthTarget::Proxy, head).await;
        }

        if status == StatusCode::OK {
            if let Err(e) = self.validate_proof(AuthTarget::Proxy, head) {
                self.evict_applied(AuthTarget::Proxy);
                return Ok(Step::Fail(e));
            }
        }
        self.commit_auth(AuthTarget::Proxy);

        if status == StatusCode::UNAUTHORIZED {
            return self.handle_challenge(AuthTarget::Server, head).await;
        }

        if status == StatusCode::OK {
            if let Err(e) = self.validate_proof(AuthTarget::Server, head) {
                self.evict_applied(AuthTarget::Server);
                return Ok(Step::Fail(e));
            }
        }
        self.commit_auth(AuthTarget::Server);

        self.follow_redirect(head)
    }

    async fn handle_challenge(&mut self, target: AuthTarget, head: &ResponseHead) -> Result<Step, NetError> {
        let status = head.status.as_u16();
        if self.body.is_streaming() && self.tunnel.state() != TunnelState::Setup {
            return Err(NetError::StreamingRetry { status });
        }
        self.state = SessionState::AwaitingAuth;

        let header_name = match target {
            AuthTarget::Server => WWW_AUTHENTICATE,
            AuthTarget::Proxy => PROXY_AUTHENTICATE,
        };
        let challenges = AuthChallenge::from_headers(&head.headers, &header_name);

        // A fresh Negotiate challenge after one was answered means the
        // handshake failed; fall back to the other offered schemes.
        let restarted = challenges.iter().any(|c| {
            c.is_bare() && matches!(c.scheme(), Some(AuthScheme::Negotiate | AuthScheme::Kerberos))
        });
        let mut dont_use_negotiate = false;
        {
            let auth = self.auth_mut(target);
            if restarted {
                if auth.in_negotiate {
                    dont_use_negotiate = true;
                    auth.second_stage = false;
                    auth.entry = None;
                    auth.header = None;
                } else {
                    auth.in_negotiate = true;
                }
            }
        }

        let (uri, method) = self.auth_uri_and_method();

        // A handshake answered without a continuation token failed; the
        // remaining schemes are still eligible.
        let mut failed_scheme = None;
        if self.auth(target).second_stage {
            let entry = self
                .auth(target)
                .entry
                .clone()
                .ok_or(NetError::UnexpectedSecurityLibraryStatus)?;
            if let Some(challenge) = challenges
                .iter()
                .find(|c| c.scheme() == Some(entry.scheme()) && c.token().is_some())
            {
                let value = header_value(&entry.respond_to_challenge(challenge, &uri, &method)?)?;
                let auth = self.auth_mut(target);
                auth.header = Some(value);
                auth.second_stage = false;
                return Ok(Step::Retry { reuse: true });
            }
            tracing::debug!(scheme = %entry.scheme(), "Handshake rejected");
            self.context.credential_cache().remove_from_cache(&entry);
            let auth = self.auth_mut(target);
            auth.entry = None;
            auth.header = None;
            auth.second_stage = false;
            failed_scheme = Some(entry.scheme());
        }
        let challenges: Vec<AuthChallenge> = challenges
            .into_iter()
            .filter(|c| failed_scheme.is_none() || c.scheme() != failed_scheme)
            .collect();

        if let Some(entry) = self.auth(target).entry.clone() {
            let stale = challenges
                .iter()
                .find(|c| c.scheme() == Some(entry.scheme()))
                .is_some_and(|c| entry.is_stale(c));
            if stale {
                tracing::debug!(scheme = %entry.scheme(), realm = entry.realm(), "Nonce expired; retrying");
                let value = header_value(&entry.challenge_response(&uri, &method)?)?;
                self.auth_mut(target).header = Some(value);
                return Ok(Step::Retry { reuse: false });
            }
            tracing::debug!(scheme = %entry.scheme(), realm = entry.realm(), "Credentials rejected");
            self.context.credential_cache().remove_from_cache(&entry);
            let auth = self.auth_mut(target);
            auth.rejected = entry.credentials().cloned();
            auth.entry = None;
            auth.header = None;
        }

        let preference = self.context.config().auth_preference;
        let Some(challenge) = select_challenge(
            &challenges,
            preference,
            self.context.capabilities(),
            dont_use_negotiate,
        )
        .cloned() else {
            tracing::debug!(status, offered = challenges.len(), "No usable authentication scheme");
            self.auth_mut(target).slot = None;
            let err = match target {
                AuthTarget::Proxy if failed_scheme.is_none() && !challenges.is_empty() => {
                    NetError::ProxyAuthUnsupported
                }
                _ => NetError::AuthenticationFailed { status },
            };
            return Ok(Step::Fail(err));
        };
        tracing::debug!(scheme = challenge.scheme_name(), realm = challenge.realm(), "Selected challenge");

        let Some(entry) = self.obtain_entry(target, &challenge).await? else {
            self.auth_mut(target).slot = None;
            return Ok(Step::Fail(NetError::AuthenticationFailed { status }));
        };
        let value = header_value(&entry.respond_to_challenge(&challenge, &uri, &method)?)?;
        let two_stage = entry.scheme().is_two_stage();
        let domain = match entry.payload() {
            SchemePayload::Digest { .. } => DigestChallenge::from_challenge(&challenge)
                .ok()
                .and_then(|c| c.domain),
            _ => None,
        };

        let auth = self.auth_mut(target);
        auth.header = Some(value);
        auth.second_stage = two_stage;
        auth.digest_domain = domain;
        auth.entry = Some(entry);
        Ok(Step::Retry { reuse: two_stage })
    }

    /// Find cached credentials for the challenge's realm, or create an entry
    /// from the credential provider or a security-context provider.
    async fn obtain_entry(
        &mut self,
        target: AuthTarget,
        challenge: &AuthChallenge,
    ) -> Result<Option<CredentialEntry>, NetError> {
        let Some(scheme) = challenge.scheme() else {
            return Ok(None);
        };
        let space = self.protection_space(target, challenge.realm())?;
        let key = space.key(scheme, true);
        let cache = Arc::clone(self.context.credential_cache());
        let requests = Arc::clone(cache.realm_requests());

        loop {
            if let Some(entry) = cache.get(&key, None) {
                tracing::debug!(key = %key, "Using cached credentials");
                return Ok(Some(entry.fresh_handshake()));
            }
            match requests.acquire(&key, self.id).await {
                RealmSlot::Owner(guard) => {
                    self.auth_mut(target).slot = Some(guard);
                    break;
                }
                RealmSlot::Unserialized | RealmSlot::Reentrant => break,
                RealmSlot::Waited => continue,
            }
        }

        let entry = match scheme {
            AuthScheme::Basic | AuthScheme::Digest => {
                let Some(credentials) = self.request_credentials(target, &space, scheme).await else {
                    return Ok(None);
                };
                let path = self.entry_path(target);
                if scheme == AuthScheme::Basic {
                    CredentialEntry::basic(space, path, credentials)
                } else {
                    let params = Arc::new(DigestParameters::new()?);
                    CredentialEntry::digest(space, path, credentials, params)
                }
            }
            AuthScheme::Ntlm | AuthScheme::Negotiate | AuthScheme::Kerberos => {
                let Some(provider) = self.context.capabilities().provider_for(scheme).cloned() else {
                    return Ok(None);
                };
                let credentials = if scheme != AuthScheme::Ntlm {
                    None
                } else if provider.supports_transparent() && !self.auth(target).tried_transparent {
                    self.auth_mut(target).tried_transparent = true;
                    tracing::debug!(host = %space.host, "Trying transparent NTLM");
                    None
                } else {
                    match self.request_credentials(target, &space, scheme).await {
                        Some(credentials) => Some(credentials),
                        None => return Ok(None),
                    }
                };
                let handle = Arc::new(NegotiateHandle::new(provider, space.host.clone(), scheme, credentials));
                let path = self.entry_path(target);
                CredentialEntry::two_stage(space, scheme, path, handle)
            }
        };
        Ok(Some(entry))
    }

    async fn request_credentials(
        &mut self,
        target: AuthTarget,
        space: &ProtectionSpace,
        scheme: AuthScheme,
    ) -> Option<Credentials> {
        let rejected = self.auth(target).rejected.clone();
        if target == AuthTarget::Proxy {
            if let Some(configured) = self.proxy.as_ref().and_then(ProxySettings::credentials) {
                if rejected.as_ref() != Some(&configured) {
                    return Some(configured);
                }
            }
        }

        let provider = Arc::clone(self.context.credential_provider()?);
        let request = CredentialRequest {
            target,
            host: space.host.clone(),
            port: space.port,
            protocol: self.url.scheme().to_string(),
            realm: space.realm.clone(),
            scheme,
            url: self.url.clone(),
        };
        tracing::debug!(host = %request.host, realm = %request.realm, scheme = %scheme, "Requesting credentials");
        let credentials = provider.request_credentials(&request).await?;
        if rejected.as_ref() == Some(&credentials) {
            tracing::debug!(host = %request.host, "Provider repeated rejected credentials");
            return None;
        }
        Some(credentials)
    }

    /// Apply cached credentials before any challenge.
    fn apply_preemptive(&mut self) -> Result<(), NetError> {
        let cache = Arc::clone(self.context.credential_cache());
        let (uri, method) = self.auth_uri_and_method();

        if let Some(proxy) = &self.proxy {
            if !self.tunnel.is_tunneling()
                && self.proxy_auth.header.is_none()
                && !self.proxy_auth.user_supplied
            {
                let (host, port) = proxy.host_port();
                if let Some(entry) = cache.lookup_preemptive(AuthTarget::Proxy, "", &host, port, None) {
                    let value = header_value(&entry.challenge_response(&uri, &method)?)?;
                    tracing::trace!(scheme = %entry.scheme(), "Preemptive proxy credentials");
                    self.proxy_auth.header = Some(value);
                    self.proxy_auth.entry = Some(entry);
                }
            }
        }

        if self.tunnel.state() != TunnelState::Setup
            && self.server_auth.header.is_none()
            && !self.server_auth.user_supplied
        {
            let host = self.origin_host()?;
            let port = self.origin_port()?;
            if let Some(entry) = cache.lookup_preemptive(
                AuthTarget::Server,
                self.url.scheme(),
                &host,
                port,
                Some(self.url.path()),
            ) {
                let value = header_value(&entry.challenge_response(&uri, &method)?)?;
                tracing::trace!(scheme = %entry.scheme(), path = ?entry.path(), "Preemptive server credentials");
                self.server_auth.header = Some(value);
                self.server_auth.entry = Some(entry);
            }
        }
        Ok(())
    }

    /// Store the credentials that just worked and release their realm.
    fn commit_auth(&mut self, target: AuthTarget) {
        let auth = self.auth_mut(target);
        let Some(entry) = auth.entry.take() else {
            return;
        };
        let domain = auth.digest_domain.take();
        let slot = auth.slot.take();
        auth.header = None;
        auth.second_stage = false;
        auth.in_negotiate = false;
        auth.rejected = None;

        let cache = Arc::clone(self.context.credential_cache());
        match (entry.payload(), domain) {
            (SchemePayload::Digest { .. }, Some(domain)) if target == AuthTarget::Server => {
                for path in domain.split_whitespace() {
                    let Ok(scoped) = self.url.join(path) else {
                        continue;
                    };
                    let (Some(host), Some(port)) = (scoped.host_str(), scoped.port_or_known_default())
                    else {
                        continue;
                    };
                    let space = ProtectionSpace::new(
                        AuthTarget::Server,
                        scoped.scheme(),
                        host.to_ascii_lowercase(),
                        port,
                        entry.realm(),
                    );
                    cache.add_to_cache(&entry.relocated(space, Some(reduce_path(scoped.path()))));
                }
            }
            (SchemePayload::Basic { .. }, _) if target == AuthTarget::Server => {
                let widened = match entry.path() {
                    Some(old) => entry.with_path(Some(narrowed_path(old, self.url.path()))),
                    None => entry.clone(),
                };
                cache.remove_from_cache(&entry);
                cache.add_to_cache(&widened);
            }
            _ => cache.add_to_cache(&entry.fresh_handshake()),
        }
        tracing::debug!(target = ?target, scheme = %entry.scheme(), realm = entry.realm(), "Committed credentials");
        drop(slot);
    }

    fn evict_applied(&mut self, target: AuthTarget) {
        if let Some(entry) = self.auth(target).entry.clone() {
            self.context.credential_cache().remove_from_cache(&entry);
        }
        self.auth_mut(target).reset();
    }

    /// Check `Authentication-Info` style proofs when enabled.
    fn validate_proof(&self, target: AuthTarget, head: &ResponseHead) -> Result<(), NetError> {
        let config = self.context.config();
        let enabled = match target {
            AuthTarget::Server => config.validate_server_proof,
            AuthTarget::Proxy => config.validate_proxy_proof,
        };
        if !enabled {
            return Ok(());
        }
        let Some(entry) = self.auth(target).entry.as_ref() else {
            return Ok(());
        };
        let Some(name) = entry.proof_header_name() else {
            return Ok(());
        };
        let Some(value) = head.headers.get(&name).and_then(|v| v.to_str().ok()) else {
            return Ok(());
        };
        let (uri, _) = self.auth_uri_and_method();
        entry.validate_server_proof(value, &uri)
    }

    fn follow_redirect(&mut self, head: &ResponseHead) -> Result<Step, NetError> {
        let config = self.context.config();
        if !config.follow_redirects {
            return Ok(Step::Done);
        }
        let location = head.headers.get(LOCATION).and_then(|v| v.to_str().ok());
        let action = redirect::plan_redirect(
            &self.url,
            &self.method,
            head.status,
            location,
            config.strict_post_redirect,
        );
        if action != RedirectAction::None && self.body.is_streaming() {
            return Err(NetError::StreamingRetry {
                status: head.status.as_u16(),
            });
        }

        match action {
            RedirectAction::None => Ok(Step::Done),
            RedirectAction::UseProxy { proxy } => {
                let host = proxy.host_str().ok_or(NetError::InvalidRedirect)?;
                let port = proxy.port_or_known_default().unwrap_or(80);
                self.proxy = Some(ProxySettings::new(&connect_authority(host, port))?);
                self.proxy_from_redirect = true;
                self.proxy_auth.reset();
                self.tunnel.reset();
                self.state = SessionState::Redirecting;
                tracing::debug!(url = %self.url, proxy = %proxy, "Re-routing through proxy");
                Ok(Step::Retry { reuse: false })
            }
            RedirectAction::Follow {
                url,
                method,
                cross_origin,
            } => {
                tracing::debug!(from = %self.url, to = %url, status = head.status.as_u16(), "Following redirect");
                if cross_origin {
                    self.headers.remove_name(&AUTHORIZATION);
                    self.headers.remove_name(&COOKIE);
                    self.server_auth.user_supplied = false;
                }
                if method != self.method {
                    self.body = RequestBody::Empty;
                    self.headers.remove_name(&CONTENT_TYPE);
                    self.headers.remove_name(&CONTENT_LENGTH);
                    self.method = method;
                }
                self.url = url;
                if !self.proxy_from_redirect {
                    self.proxy = self.context.proxy_for(&self.url);
                }
                self.server_auth.reset();
                self.state = SessionState::Redirecting;
                Ok(Step::Retry { reuse: false })
            }
        }
    }

    async fn finish(&mut self, head: ResponseHead) -> Result<(), NetError> {
        let response = self.read_response(head).await?;
        let status = response.status();

        if let Some(cache) = self.context.response_cache() {
            cache.store(
                &self.url,
                &self.method,
                status,
                response.headers(),
                response.body().clone(),
            );
        }
        self.response = Some(response);

        match status.as_u16() {
            404 | 410 => Err(NetError::NotFound {
                status: status.as_u16(),
            }),
            code if code >= 400 => Err(NetError::HttpStatus { status: code }),
            _ => Ok(()),
        }
    }

    async fn read_response(&mut self, head: ResponseHead) -> Result<HttpResponse, NetError> {
        self.state = SessionState::ReadingResponse;
        let body = match self.connection.as_mut() {
            Some(conn) => conn.read_body().await?,
            None => Bytes::new(),
        };
        Ok(HttpResponse::new(head.status, head.headers, body, self.url.clone()))
    }

    fn cached_response(&self) -> Option<HttpResponse> {
        let cache = self.context.response_cache()?;
        cache
            .get(&self.url, &self.method)
            .map(|cached| HttpResponse::from_cache(cached, self.url.clone()))
    }

    /// Headers for the next request on the wire.
    fn wire_headers(&self) -> HeaderMap {
        let mut wire = self.headers.clone();
        let setup = self.tunnel.state() == TunnelState::Setup;
        let via_proxy = self.proxy.is_some() && !self.tunnel.is_tunneling();

        if !setup {
            if let Ok(host) = HeaderValue::from_str(&host_header(&self.url)) {
                wire.set_if_absent(HOST, host);
            }
            let user_agent = &self.context.config().user_agent;
            if !user_agent.is_empty() {
                if let Ok(agent) = HeaderValue::from_str(user_agent) {
                    wire.set_if_absent(USER_AGENT, agent);
                }
            }
            wire.set_if_absent(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));

            let connection = if via_proxy { PROXY_CONNECTION } else { CONNECTION };
            if self.failed_once {
                wire.set(connection, HeaderValue::from_static("close"));
            } else {
                wire.set_if_absent(connection, HeaderValue::from_static("keep-alive"));
            }

            if self.body.is_chunked() {
                wire.set(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            } else if let Some(len) = self.body.content_length() {
                wire.set(CONTENT_LENGTH, HeaderValue::from(len));
            }

            if let Some(value) = &self.server_auth.header {
                wire.set(AUTHORIZATION, value.clone());
            }
        }

        if via_proxy {
            if let Some(value) = &self.proxy_auth.header {
                wire.set(PROXY_AUTHORIZATION, value.clone());
            }
        }
        wire.to_header_map()
    }

    /// Absolute URL through a plain proxy, origin-form otherwise.
    fn request_target(&self) -> String {
        if self.proxy.is_some() && !self.tunnel.is_tunneling() {
            self.url[..Position::AfterQuery].to_string()
        } else {
            self.url[Position::BeforePath..Position::AfterQuery].to_string()
        }
    }

    /// URI and method that Digest hashes for the request being sent.
    fn auth_uri_and_method(&self) -> (String, String) {
        if self.tunnel.state() == TunnelState::Setup {
            let authority = match (self.origin_host(), self.origin_port()) {
                (Ok(host), Ok(port)) => connect_authority(&host, port),
                _ => String::new(),
            };
            (authority, Method::CONNECT.to_string())
        } else {
            (self.request_target(), self.method.to_string())
        }
    }

    fn protection_space(&self, target: AuthTarget, realm: &str) -> Result<ProtectionSpace, NetError> {
        match target {
            AuthTarget::Server => Ok(ProtectionSpace::new(
                AuthTarget::Server,
                self.url.scheme(),
                self.origin_host()?,
                self.origin_port()?,
                realm,
            )),
            AuthTarget::Proxy => {
                let proxy = self.proxy.as_ref().ok_or(NetError::UnexpectedProxyAuth)?;
                let (host, port) = proxy.host_port();
                Ok(ProtectionSpace::new(
                    AuthTarget::Proxy,
                    "",
                    host.to_ascii_lowercase(),
                    port,
                    realm,
                ))
            }
        }
    }

    fn entry_path(&self, target: AuthTarget) -> Option<String> {
        match target {
            AuthTarget::Server => Some(reduce_path(self.url.path())),
            AuthTarget::Proxy => None,
        }
    }

    fn origin_host(&self) -> Result<String, NetError> {
        self.url
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or(NetError::InvalidUrl)
    }

    fn origin_port(&self) -> Result<u16, NetError> {
        self.url.port_or_known_default().ok_or(NetError::InvalidUrl)
    }

    fn auth(&self, target: AuthTarget) -> &AuthState {
        match target {
            AuthTarget::Server => &self.server_auth,
            AuthTarget::Proxy => &self.proxy_auth,
        }
    }

    fn auth_mut(&mut self, target: AuthTarget) -> &mut AuthState {
        match target {
            AuthTarget::Server => &mut self.server_auth,
            AuthTarget::Proxy => &mut self.proxy_auth,
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, NetError> {
    HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader)
}

/// `Host` value: the host plus any non-default port.
fn host_header(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::transport::{Timeouts, Transport};
    use crate::urlrequest::context::SessionConfig;
    use futures::future::BoxFuture;

    struct Unreachable;

    impl Transport for Unreachable {
        fn connect<'a>(
            &'a self,
            _endpoint: &'a Endpoint,
            _timeouts: &'a Timeouts,
        ) -> BoxFuture<'a, Result<Box<dyn TransportSession>, NetError>> {
            Box::pin(async { Err(NetError::ConnectionRefused) })
        }
    }

    fn session(url: &str, config: SessionConfig) -> ConnectionSession {
        let ctx = SessionContext::builder()
            .config(config)
            .transport(Arc::new(Unreachable))
            .build();
        ConnectionSession::new(Arc::new(ctx), Method::GET, Url::parse(url).unwrap())
    }

    #[test]
    fn test_load_state_mapping() {
        assert_eq!(SessionState::Connecting.to_load_state(), LoadState::Connecting);
        assert_eq!(SessionState::AwaitingAuth.to_load_state(), LoadState::WaitingForDelegate);
        assert_eq!(
            SessionState::EstablishingProxyTunnel.to_load_state(),
            LoadState::EstablishingProxyTunnel
        );
        assert_eq!(SessionState::Complete.to_load_state(), LoadState::Idle);
    }

    #[test]
    fn test_request_target_forms() {
        let mut s = session("http://example.com:8080/a/b?q=1#frag", SessionConfig::default());
        assert_eq!(s.request_target(), "/a/b?q=1");

        s.proxy = Some(ProxySettings::new("proxy:3128").unwrap());
        assert_eq!(s.request_target(), "http://example.com:8080/a/b?q=1");
    }

    #[test]
    fn test_standard_headers() {
        let mut s = session("http://example.com:8080/", SessionConfig::default());
        s.add_header("Accept", "application/json").unwrap();
        s.set_body(RequestBody::from("abc"));

        let wire = s.wire_headers();
        assert_eq!(wire.get(HOST).unwrap(), "example.com:8080");
        assert_eq!(wire.get(ACCEPT).unwrap(), "application/json");
        assert_eq!(wire.get(CONNECTION).unwrap(), "keep-alive");
        assert_eq!(wire.get(CONTENT_LENGTH).unwrap(), "3");
        assert!(wire.get(USER_AGENT).is_some());

        s.failed_once = true;
        assert_eq!(s.wire_headers().get(CONNECTION).unwrap(), "close");
    }

    #[test]
    fn test_proxy_connection_header() {
        let mut s = session("http://example.com/", SessionConfig::default());
        s.proxy = Some(ProxySettings::new("proxy:3128").unwrap());
        let wire = s.wire_headers();
        assert_eq!(wire.get(&PROXY_CONNECTION).unwrap(), "keep-alive");
        assert!(wire.get(CONNECTION).is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces() {
        let mut s = session("http://example.com/", SessionConfig::default());
        assert_eq!(s.start().await.unwrap_err(), NetError::ConnectionRefused);
        assert_eq!(s.state(), SessionState::Failed);
        assert!(s.take_response().is_none());
    }
}
