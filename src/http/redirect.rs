//! Redirect decisions.
//!
//! A 3xx response is followed when it carries a `Location` that resolves to
//! a URL with the same scheme as the current one. `305 Use Proxy` keeps the
//! URL and re-routes it through the proxy named by `Location`.

use http::{Method, StatusCode};
use url::Url;

/// What to do with a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectAction {
    /// Return the response to the caller as is.
    None,
    /// Request `url` next.
    Follow {
        url: Url,
        /// Method for the next request (POST may turn into GET).
        method: Method,
        /// The new URL has a different origin; drop user credentials.
        cross_origin: bool,
    },
    /// Request the same URL again through the proxy at `proxy`.
    UseProxy { proxy: Url },
}

/// 300–307, except 304 Not Modified and the unused 306.
pub fn is_redirect_status(status: StatusCode) -> bool {
    let code = status.as_u16();
    (300..=307).contains(&code) && code != 304 && code != 306
}

/// Resolve a `Location` value against `base`.
///
/// Absolute locations must keep the scheme of `base`; relative ones are
/// joined onto it.
pub fn resolve_location(base: &Url, location: &str) -> Option<Url> {
    match Url::parse(location) {
        Ok(absolute) => absolute
            .scheme()
            .eq_ignore_ascii_case(base.scheme())
            .then_some(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(location).ok(),
        Err(_) => None,
    }
}

/// Decide whether and where to redirect.
pub fn plan_redirect(
    current: &Url,
    method: &Method,
    status: StatusCode,
    location: Option<&str>,
    strict_post_redirect: bool,
) -> RedirectAction {
    if !is_redirect_status(status) {
        return RedirectAction::None;
    }
    let Some(location) = location.map(str::trim).filter(|l| !l.is_empty()) else {
        return RedirectAction::None;
    };
    let Some(target) = resolve_location(current, location) else {
        tracing::debug!(location, "Not following redirect to another scheme");
        return RedirectAction::None;
    };

    if status == StatusCode::USE_PROXY {
        return RedirectAction::UseProxy { proxy: target };
    }

    let next_method = if *method == Method::POST
        && !strict_post_redirect
        && status != StatusCode::TEMPORARY_REDIRECT
    {
        Method::GET
    } else {
        method.clone()
    };

    RedirectAction::Follow {
        cross_origin: current.origin() != target.origin(),
        url: target,
        method: next_method,
    }
}
