//! Canonical header storage.
//!
//! # Responsibilities
//! - Canonicalize header names (lowercase, `_` → `-`)
//! - Last write wins per canonical key
//! - Append to list-valued headers (`via`, `proxy-tmpl`, `link`)
//!
//! # Design Decisions
//! - Keys are stored canonical, so `Content_Type`, `content-type` and
//!   `Content-Type` address one entry
//! - Ordered map keeps serialized output deterministic

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Header carrying the hop history appended by each proxy pass.
pub const VIA: &str = "via";
/// Header carrying the proxy URI templates appended by each proxy pass.
pub const PROXY_TMPL: &str = "proxy-tmpl";
/// Structured hypermedia link header.
pub const LINK: &str = "link";
pub const CONTENT_TYPE: &str = "content-type";

/// Convert a header name into its canonical form.
pub fn canonicalize(name: &str) -> String {
    name.trim().to_lowercase().replace('_', "-")
}

/// Case- and separator-insensitive header map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderMap(BTreeMap<String, String>);

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&canonicalize(name)).map(String::as_str)
    }

    /// Set a header, replacing any previous value under the same canonical key.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(canonicalize(name), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&canonicalize(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&canonicalize(name))
    }

    /// Append `value` to a list-valued header, joining with `separator`.
    pub fn append(&mut self, name: &str, value: &str, separator: &str) {
        let entry = self.0.entry(canonicalize(name)).or_default();
        if !entry.is_empty() {
            entry.push_str(separator);
        }
        entry.push_str(value);
    }

    /// Insert every entry from `other` that is not already present here.
    pub fn merge_missing(&mut self, other: &Self) {
        for (name, value) in other.iter() {
            self.0
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.set(name.as_ref(), value);
        }
        map
    }
}

// Incoming maps may use any spelling; canonicalize on the way in.
// Scalar values are stringified, nulls dropped.
impl<'de> Deserialize<'de> for HeaderMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((name, s)),
                other => Some((name, other.to_string())),
            })
            .collect())
    }
}
