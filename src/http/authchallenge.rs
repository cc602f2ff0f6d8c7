//! `WWW-Authenticate` / `Proxy-Authenticate` challenge parsing and scheme selection.
//!
//! A header value may carry several challenges (`Basic realm="a", Digest realm="b", nonce="n"`)
//! and a response may carry several header lines. Both are flattened into a list of
//! [`AuthChallenge`] in arrival order, then [`select_challenge`] picks the strongest
//! scheme the client is able to answer.

use crate::http::authcache::AuthScheme;
use crate::http::negotiateauth::AuthCapabilities;
use http::{HeaderMap, HeaderName};

/// Scheme preference, strongest first.
const SCHEME_ORDER: [AuthScheme; 5] = [
    AuthScheme::Negotiate,
    AuthScheme::Kerberos,
    AuthScheme::Digest,
    AuthScheme::Ntlm,
    AuthScheme::Basic,
];

/// One parsed authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    scheme_name: String,
    scheme: Option<AuthScheme>,
    raw: String,
    token: Option<String>,
    params: Vec<(String, String)>,
}

impl AuthChallenge {
    /// Parse a single header value into its challenges.
    pub fn parse_header(value: &str) -> Vec<AuthChallenge> {
        let mut challenges = Vec::new();
        let mut current: Option<(String, Vec<&str>)> = None;

        for element in split_elements(value) {
            let first_word = element.split_whitespace().next().unwrap_or_default();
            if !first_word.contains('=') {
                // A bare token starts a new challenge: "Digest realm=..." or "NTLM".
                if let Some((name, parts)) = current.take() {
                    challenges.push(Self::build(name, &parts));
                }
                let rest = element[first_word.len()..].trim();
                let mut parts = Vec::new();
                if !rest.is_empty() {
                    parts.push(rest);
                }
                current = Some((first_word.to_string(), parts));
            } else if let Some((_, parts)) = current.as_mut() {
                parts.push(element);
            }
        }
        if let Some((name, parts)) = current {
            challenges.push(Self::build(name, &parts));
        }
        challenges
    }

    /// Collect every challenge from all header lines named `name`.
    pub fn from_headers(headers: &HeaderMap, name: &HeaderName) -> Vec<AuthChallenge> {
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Self::parse_header)
            .collect()
    }

    fn build(scheme_name: String, parts: &[&str]) -> AuthChallenge {
        let scheme = AuthScheme::from_name(&scheme_name);
        let mut token = None;
        let mut params = Vec::new();

        // token68 form ("Negotiate YII...==") only applies to a lone trailing part.
        if let [only] = parts {
            if is_token68(only) {
                token = Some(only.to_string());
            }
        }
        if token.is_none() {
            for part in parts {
                params.extend(parse_params(part));
            }
        }

        let raw = if parts.is_empty() {
            scheme_name.clone()
        } else {
            format!("{} {}", scheme_name, parts.join(", "))
        };

        AuthChallenge {
            scheme_name,
            scheme,
            raw,
            token,
            params,
        }
    }

    /// Scheme, if it is one this crate implements.
    pub fn scheme(&self) -> Option<AuthScheme> {
        self.scheme
    }

    /// Scheme name as sent by the server.
    pub fn scheme_name(&self) -> &str {
        &self.scheme_name
    }

    /// The challenge text, scheme included.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The opaque continuation token of a two-stage scheme.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Case-insensitive parameter lookup.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The declared realm; empty when the challenge names none.
    pub fn realm(&self) -> &str {
        self.param("realm").unwrap_or_default()
    }

    /// True for a challenge with neither parameters nor token (`Negotiate`).
    pub fn is_bare(&self) -> bool {
        self.token.is_none() && self.params.is_empty()
    }
}

/// Pick the challenge to answer.
///
/// An explicit `preference` wins when the server offered it and it is usable.
/// Negotiate and Kerberos are skipped when `dont_use_negotiate` is set, which
/// is how a failed negotiation falls back to the next acceptable scheme.
pub fn select_challenge<'a>(
    challenges: &'a [AuthChallenge],
    preference: Option<AuthScheme>,
    capabilities: &AuthCapabilities,
    dont_use_negotiate: bool,
) -> Option<&'a AuthChallenge> {
    let usable = |scheme: AuthScheme| match scheme {
        AuthScheme::Negotiate | AuthScheme::Kerberos => {
            !dont_use_negotiate && capabilities.supports(scheme)
        }
        AuthScheme::Ntlm => capabilities.supports(scheme),
        AuthScheme::Basic | AuthScheme::Digest => true,
    };
    let find = |scheme: AuthScheme| challenges.iter().find(|c| c.scheme() == Some(scheme));

    if let Some(preferred) = preference.filter(|s| usable(*s)) {
        if let Some(found) = find(preferred) {
            return Some(found);
        }
    }

    SCHEME_ORDER
        .iter()
        .filter(|s| usable(**s))
        .find_map(|s| find(*s))
}

/// Split `key=value` pairs separated by commas, honoring quotes.
pub fn parse_params(input: &str) -> Vec<(String, String)> {
    split_elements(input)
        .into_iter()
        .filter_map(|param| {
            let (key, value) = param.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_ascii_lowercase(), unquote(value.trim())))
        })
        .collect()
}

/// Split on commas that are not inside a quoted string.
fn split_elements(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in header.char_indices() {
        match c {
            '\\' if in_quotes && !escaped => {
                escaped = true;
                continue;
            }
            '"' if !escaped => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let part = header[start..i].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = i + 1;
            }
            _ => {}
        }
        escaped = false;
    }

    let part = header[start..].trim();
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(c);
            }
        }
        out
    } else {
        value.to_string()
    }
}

/// RFC 7235 token68: base64-ish characters with optional trailing '='.
fn is_token68(s: &str) -> bool {
    let body = s.trim_end_matches('=');
    !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '+' | '/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::negotiateauth::{SecurityContext, SecurityContextProvider};
    use crate::http::authentry::Credentials;
    use crate::base::neterror::NetError;
    use std::sync::Arc;

    struct NullProvider;

    impl SecurityContextProvider for NullProvider {
        fn new_context(
            &self,
            _host: &str,
            _scheme: AuthScheme,
            _credentials: Option<&Credentials>,
        ) -> Result<Box<dyn SecurityContext>, NetError> {
            Err(NetError::UnsupportedAuthScheme)
        }
    }

    #[test]
    fn test_parse_single_digest() {
        let c = AuthChallenge::parse_header(
            r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b", opaque="5ccc""#,
        );
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].scheme(), Some(AuthScheme::Digest));
        assert_eq!(c[0].realm(), "testrealm@host.com");
        assert_eq!(c[0].param("QOP"), Some("auth,auth-int"));
        assert_eq!(c[0].param("nonce"), Some("dcd98b"));
    }

    #[test]
    fn test_parse_multiple_in_one_line() {
        let c = AuthChallenge::parse_header(r#"Basic realm="a", Digest realm="b", nonce="n""#);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].scheme(), Some(AuthScheme::Basic));
        assert_eq!(c[0].realm(), "a");
        assert_eq!(c[1].scheme(), Some(AuthScheme::Digest));
        assert_eq!(c[1].param("nonce"), Some("n"));
    }

    #[test]
    fn test_parse_token68_and_bare() {
        let c = AuthChallenge::parse_header("Negotiate YIIBhgYGKwYBBQUCoIIBejCC==");
        assert_eq!(c[0].token(), Some("YIIBhgYGKwYBBQUCoIIBejCC=="));
        assert!(!c[0].is_bare());

        let bare = AuthChallenge::parse_header("NTLM");
        assert!(bare[0].is_bare());
        assert_eq!(bare[0].raw(), "NTLM");
    }

    #[test]
    fn test_quoted_comma_and_escape() {
        let params = parse_params(r#"realm="a, \"b\"", nonce=xyz"#);
        assert_eq!(params[0], ("realm".to_string(), "a, \"b\"".to_string()));
        assert_eq!(params[1], ("nonce".to_string(), "xyz".to_string()));
    }

    #[test]
    fn test_unknown_scheme_kept_but_unselectable() {
        let c = AuthChallenge::parse_header(r#"Bearer realm="api""#);
        assert_eq!(c[0].scheme(), None);
        assert_eq!(c[0].scheme_name(), "Bearer");
        assert!(select_challenge(&c, None, &AuthCapabilities::default(), false).is_none());
    }

    #[test]
    fn test_select_prefers_digest_over_basic() {
        let c = AuthChallenge::parse_header(r#"Basic realm="a", Digest realm="b", nonce="n""#);
        let chosen = select_challenge(&c, None, &AuthCapabilities::default(), false).unwrap();
        assert_eq!(chosen.scheme(), Some(AuthScheme::Digest));
    }

    #[test]
    fn test_select_honors_preference() {
        let c = AuthChallenge::parse_header(r#"Basic realm="a", Digest realm="b", nonce="n""#);
        let chosen = select_challenge(
            &c,
            Some(AuthScheme::Basic),
            &AuthCapabilities::default(),
            false,
        )
        .unwrap();
        assert_eq!(chosen.scheme(), Some(AuthScheme::Basic));
    }

    #[test]
    fn test_negotiate_requires_capability() {
        let mut c = AuthChallenge::parse_header("Negotiate");
        c.extend(AuthChallenge::parse_header(r#"Basic realm="r""#));

        let none = AuthCapabilities::default();
        assert_eq!(
            select_challenge(&c, None, &none, false).unwrap().scheme(),
            Some(AuthScheme::Basic)
        );

        let caps = AuthCapabilities::default().with_negotiate(Arc::new(NullProvider));
        assert_eq!(
            select_challenge(&c, None, &caps, false).unwrap().scheme(),
            Some(AuthScheme::Negotiate)
        );
        // Failed negotiation falls back.
        assert_eq!(
            select_challenge(&c, None, &caps, true).unwrap().scheme(),
            Some(AuthScheme::Basic)
        );
    }

    #[test]
    fn test_from_headers_multiple_lines() {
        let mut headers = HeaderMap::new();
        headers.append(http::header::WWW_AUTHENTICATE, "NTLM".parse().unwrap());
        headers.append(
            http::header::WWW_AUTHENTICATE,
            r#"Basic realm="x""#.parse().unwrap(),
        );
        let c = AuthChallenge::from_headers(&headers, &http::header::WWW_AUTHENTICATE);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].scheme(), Some(AuthScheme::Ntlm));
    }
}
