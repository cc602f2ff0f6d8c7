//! HTTP Response with body access.

use crate::base::neterror::NetError;
use crate::http::httpcache::CachedResponse;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use url::Url;

/// Final response of a session.
///
/// The body is fully read before the session hands the response out, so a
/// failed status can still be inspected after the session returned an error.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    url: Url,
    from_cache: bool,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, url: Url) -> Self {
        Self {
            status,
            headers,
            body,
            url,
            from_cache: false,
        }
    }

    pub(crate) fn from_cache(cached: CachedResponse, url: Url) -> Self {
        Self {
            status: cached.status,
            headers: cached.headers,
            body: cached.body,
            url,
            from_cache: true,
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// URL the response was finally served from, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the response was answered by the response cache.
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    /// Body deserialized as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|_| NetError::JsonParseError)
    }
}
