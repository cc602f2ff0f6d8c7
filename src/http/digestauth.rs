//! HTTP Digest Authentication (RFC 2617 / RFC 7616).
//!
//! A [`DigestParameters`] instance carries the mutable per-protection-space
//! state (nonce, nonce count, client nonce, cached session key) and is shared
//! by every cache entry created from the same challenge, including entries
//! spawned for the challenge's `domain` list.
//!
//! ## Supported Features
//! - MD5, MD5-sess, SHA-256 and SHA-256-sess
//! - qop=auth (auth-int is never selected)
//! - Nonce count tracking, reset whenever the nonce changes
//! - Client nonce reuse for a bounded number of requests
//! - Stale nonce detection and `Authentication-Info` verification

use crate::base::neterror::NetError;
use crate::http::authchallenge::{parse_params, AuthChallenge};
use crate::http::authentry::Credentials;
use boring::hash::{hash, MessageDigest};
use std::fmt::Write;
use std::sync::{Mutex, PoisonError};

/// A client nonce is replaced after this many uses.
const CNONCE_REUSE_LIMIT: u32 = 5;
const CNONCE_BYTES: usize = 20;

/// Digest authentication algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// MD5, also used when the challenge names no algorithm.
    #[default]
    Md5,
    /// MD5-sess (session-based)
    Md5Sess,
    /// SHA-256
    Sha256,
    /// SHA-256-sess (session-based)
    Sha256Sess,
}

impl DigestAlgorithm {
    /// Parse algorithm from header value.
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "md5-sess" => Some(Self::Md5Sess),
            "sha-256" => Some(Self::Sha256),
            "sha-256-sess" => Some(Self::Sha256Sess),
            _ => None,
        }
    }

    /// Get the algorithm name for the Authorization header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    /// Check if this is a session-based algorithm.
    fn is_session(&self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn message_digest(&self) -> MessageDigest {
        match self {
            Self::Sha256 | Self::Sha256Sess => MessageDigest::sha256(),
            Self::Md5 | Self::Md5Sess => MessageDigest::md5(),
        }
    }
}

/// The Digest-specific view of a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub domain: Option<String>,
    pub algorithm: DigestAlgorithm,
    pub qop_auth: bool,
    pub stale: bool,
    pub userhash: bool,
}

impl DigestChallenge {
    /// Extract Digest parameters. A nonce is required.
    pub fn from_challenge(challenge: &AuthChallenge) -> Result<Self, NetError> {
        let nonce = challenge
            .param("nonce")
            .filter(|n| !n.is_empty())
            .ok_or(NetError::InvalidAuthChallenge)?
            .to_string();

        let algorithm = match challenge.param("algorithm") {
            Some(name) => DigestAlgorithm::parse(name).ok_or(NetError::InvalidAuthChallenge)?,
            None => DigestAlgorithm::Md5,
        };

        // Only "auth" is spoken; a server offering just auth-int gets the RFC 2069 form.
        let qop_auth = challenge.param("qop").is_some_and(|qop| {
            qop.split(|c: char| c == ',' || c.is_whitespace())
                .any(|v| v.eq_ignore_ascii_case("auth"))
        });

        Ok(Self {
            realm: challenge.realm().to_string(),
            nonce,
            opaque: challenge.param("opaque").map(String::from),
            domain: challenge.param("domain").map(String::from),
            algorithm,
            qop_auth,
            stale: challenge
                .param("stale")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            userhash: challenge
                .param("userhash")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
        })
    }
}

#[derive(Debug)]
struct DigestState {
    nonce: String,
    opaque: Option<String>,
    algorithm: DigestAlgorithm,
    qop_auth: bool,
    userhash: bool,
    nonce_count: u32,
    cnonce: String,
    cnonce_uses: u32,
    /// Session HA1; cleared whenever the nonce or cnonce changes.
    session_ha1: Option<String>,
}

impl DigestState {
    fn take_cnonce(&mut self) -> Result<String, NetError> {
        if self.cnonce_uses >= CNONCE_REUSE_LIMIT {
            self.refresh_cnonce()?;
        }
        self.cnonce_uses += 1;
        Ok(self.cnonce.clone())
    }

    fn refresh_cnonce(&mut self) -> Result<(), NetError> {
        self.cnonce = generate_cnonce()?;
        self.cnonce_uses = 0;
        self.session_ha1 = None;
        Ok(())
    }

    /// Returns whether the nonce changed. A new nonce restarts the count
    /// and gets a new cnonce.
    fn set_nonce(&mut self, nonce: &str) -> Result<bool, NetError> {
        if self.nonce == nonce {
            return Ok(false);
        }
        self.nonce = nonce.to_string();
        self.nonce_count = 0;
        self.refresh_cnonce()?;
        Ok(true)
    }

    fn ha1(&mut self, credentials: &Credentials, realm: &str, cnonce: &str) -> Result<String, NetError> {
        let md = self.algorithm.message_digest();
        let base = hex_hash(
            md,
            &format!("{}:{}:{}", credentials.username(), realm, credentials.password()),
        )?;
        if !self.algorithm.is_session() {
            return Ok(base);
        }
        if let Some(cached) = &self.session_ha1 {
            return Ok(cached.clone());
        }
        let session = hex_hash(md, &format!("{}:{}:{}", base, self.nonce, cnonce))?;
        self.session_ha1 = Some(session.clone());
        Ok(session)
    }

    fn digest(
        &mut self,
        credentials: &Credentials,
        realm: &str,
        a2: &str,
        nc: &str,
        cnonce: &str,
    ) -> Result<String, NetError> {
        let md = self.algorithm.message_digest();
        let ha1 = self.ha1(credentials, realm, cnonce)?;
        let ha2 = hex_hash(md, a2)?;
        let input = if self.qop_auth {
            format!("{}:{}:{}:{}:auth:{}", ha1, self.nonce, nc, cnonce, ha2)
        } else {
            format!("{}:{}:{}", ha1, self.nonce, ha2)
        };
        hex_hash(md, &input)
    }
}

/// Shared Digest state for one protection space.
#[derive(Debug)]
pub struct DigestParameters {
    state: Mutex<DigestState>,
}

impl DigestParameters {
    pub fn new() -> Result<Self, NetError> {
        Ok(Self {
            state: Mutex::new(DigestState {
                nonce: String::new(),
                opaque: None,
                algorithm: DigestAlgorithm::Md5,
                qop_auth: false,
                userhash: false,
                nonce_count: 0,
                cnonce: generate_cnonce()?,
                cnonce_uses: 0,
                session_ha1: None,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DigestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adopt the server's parameters from a fresh challenge.
    pub fn apply_challenge(&self, challenge: &DigestChallenge) -> Result<(), NetError> {
        let mut state = self.lock();
        let rotated = state.set_nonce(&challenge.nonce)?;
        state.opaque = challenge.opaque.clone();
        if state.algorithm != challenge.algorithm {
            state.algorithm = challenge.algorithm;
            state.session_ha1 = None;
        }
        state.qop_auth = challenge.qop_auth;
        state.userhash = challenge.userhash;
        if challenge.qop_auth && !rotated {
            state.refresh_cnonce()?;
        }
        Ok(())
    }

    /// Replace the nonce; the nonce count and cnonce restart when it actually changes.
    pub fn set_nonce(&self, nonce: &str) -> Result<(), NetError> {
        self.lock().set_nonce(nonce).map(|_| ())
    }

    /// True when the challenge only reports an expired nonce. The new nonce is adopted.
    pub fn is_stale(&self, challenge: &DigestChallenge) -> bool {
        if !challenge.stale || challenge.nonce.is_empty() {
            return false;
        }
        if let Err(e) = self.set_nonce(&challenge.nonce) {
            tracing::warn!(error = %e, "Could not adopt stale nonce");
            return false;
        }
        tracing::debug!(nonce = %challenge.nonce, "Digest nonce is stale, reusing credentials");
        true
    }

    /// Build an `Authorization` value for `method uri`, consuming one nonce count.
    pub fn authorization(
        &self,
        credentials: &Credentials,
        realm: &str,
        uri: &str,
        method: &str,
    ) -> Result<String, NetError> {
        let mut state = self.lock();
        let cnonce = state.take_cnonce()?;
        state.nonce_count += 1;
        let nc = format!("{:08x}", state.nonce_count);
        let response = state.digest(
            credentials,
            realm,
            &format!("{}:{}", method, uri),
            &nc,
            &cnonce,
        )?;

        let username = if state.userhash {
            hex_hash(
                state.algorithm.message_digest(),
                &format!("{}:{}", credentials.username(), realm),
            )?
        } else {
            credentials.username().to_string()
        };

        let mut auth = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            username,
            realm,
            state.nonce,
            uri,
            response,
            state.algorithm.as_str()
        );
        if let Some(opaque) = &state.opaque {
            let _ = write!(auth, ", opaque=\"{}\"", opaque);
        }
        if state.qop_auth {
            let _ = write!(auth, ", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce);
        }
        if state.userhash {
            auth.push_str(", userhash=true");
        }
        Ok(auth)
    }

    /// Verify an `Authentication-Info` header from a successful response.
    ///
    /// A `nextnonce` is adopted for later requests. The `rspauth` digest must match the one
    /// computed with an empty method over the current nonce count and cnonce.
    pub fn check_response(
        &self,
        credentials: &Credentials,
        realm: &str,
        info: &str,
        uri: &str,
    ) -> Result<(), NetError> {
        let params = parse_params(info);
        let find = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        let mut state = self.lock();
        let expected = {
            let nc = format!("{:08x}", state.nonce_count);
            let cnonce = state.cnonce.clone();
            state.digest(credentials, realm, &format!(":{}", uri), &nc, &cnonce)?
        };

        if let Some(next) = find("nextnonce") {
            state.set_nonce(next)?;
        }

        match find("rspauth") {
            Some(rspauth) if rspauth.eq_ignore_ascii_case(&expected) => Ok(()),
            _ => {
                tracing::warn!(uri, "Authentication-Info response digest mismatch");
                Err(NetError::AuthResponseInvalid)
            }
        }
    }

    pub fn nonce(&self) -> String {
        self.lock().nonce.clone()
    }

    pub fn nonce_count(&self) -> u32 {
        self.lock().nonce_count
    }

    pub fn cnonce(&self) -> String {
        self.lock().cnonce.clone()
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.lock().algorithm
    }
}

/// 20 random bytes, hex encoded.
fn generate_cnonce() -> Result<String, NetError> {
    let mut buf = [0u8; CNONCE_BYTES];
    boring::rand::rand_bytes(&mut buf).map_err(|_| NetError::UnexpectedSecurityLibraryStatus)?;
    Ok(to_hex(&buf))
}

/// Compute hex-encoded hash using the configured algorithm.
fn hex_hash(md: MessageDigest, input: &str) -> Result<String, NetError> {
    let digest =
        hash(md, input.as_bytes()).map_err(|_| NetError::UnexpectedSecurityLibraryStatus)?;
    Ok(to_hex(&digest))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}
