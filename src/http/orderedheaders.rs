use crate::base::neterror::NetError;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use std::str::FromStr;

/// A header map that strictly preserves insertion order.
///
/// Holds the caller's request headers for a session. The session adds its
/// own headers (`Host`, `Authorization`, ...) with [`Self::set`] and
/// [`Self::set_if_absent`] so user-supplied values keep their position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedHeaderMap {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl OrderedHeaderMap {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
        }
    }

    pub fn insert(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        let name_header = HeaderName::from_str(name).map_err(|_| NetError::InvalidHeader)?;
        let value_header = HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader)?;
        self.set(name_header, value_header);
        Ok(())
    }

    /// Update in place if present, else append.
    pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
        if let Some((_, v)) = self.headers.iter_mut().find(|(n, _)| *n == name) {
            *v = value;
        } else {
            self.headers.push((name, value));
        }
    }

    /// Append unless the header is already present. Returns whether it was added.
    pub fn set_if_absent(&mut self, name: HeaderName, value: HeaderValue) -> bool {
        if self.contains(&name) {
            return false;
        }
        self.headers.push((name, value));
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match HeaderName::from_str(name) {
            Ok(target) => self.remove_name(&target),
            Err(_) => false,
        }
    }

    pub fn remove_name(&mut self, name: &HeaderName) -> bool {
        let before = self.headers.len();
        self.headers.retain(|(n, _)| n != name);
        before != self.headers.len()
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        let target = HeaderName::from_str(name).ok()?;
        self.get_name(&target)
    }

    pub fn get_name(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.get_name(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter().map(|(n, v)| (n, v))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Build a standard `http::HeaderMap` in insertion order.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            map.append(name.clone(), value.clone());
        }
        map
    }
}

impl From<&HeaderMap> for OrderedHeaderMap {
    fn from(map: &HeaderMap) -> Self {
        Self {
            headers: map
                .iter()
                .map(|(n, v)| (n.clone(), v.clone()))
                .collect(),
        }
    }
}
