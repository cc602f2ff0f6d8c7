//! HTTP Basic authentication (RFC 7617) and the path rules used to scope it.

use crate::http::authentry::Credentials;
use base64::{engine::general_purpose, Engine as _};

/// `Basic base64(user:password)`.
pub fn basic_header_value(credentials: &Credentials) -> String {
    let plain = zeroize::Zeroizing::new(format!(
        "{}:{}",
        credentials.username(),
        credentials.password()
    ));
    format!("Basic {}", general_purpose::STANDARD.encode(plain.as_bytes()))
}

/// Directory part of a request path: everything up to and including the
/// last `/`. Scopes always end at a segment boundary, so `/admin` covers `/`
/// and never acts as a prefix of `/administrator`.
pub fn reduce_path(path: &str) -> String {
    match path.rfind('/') {
        Some(slash) => path[..=slash].to_string(),
        None => path.to_string(),
    }
}

/// Longest common prefix of two paths that ends at a `/`.
pub fn root_path(a: &str, b: &str) -> String {
    let common = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    match a.as_bytes()[..common].iter().rposition(|b| *b == b'/') {
        Some(slash) => a[..=slash].to_string(),
        None => String::new(),
    }
}

/// Path to cache Basic credentials under after they worked for `request_path`.
///
/// Keeps the old scope when the request fell inside it; otherwise widens to
/// the common root of the two.
pub fn narrowed_path(old_path: &str, request_path: &str) -> String {
    let new_path = reduce_path(request_path);
    if !old_path.starts_with(&new_path) || new_path.len() >= old_path.len() {
        root_path(old_path, &new_path)
    } else {
        new_path
    }
}
