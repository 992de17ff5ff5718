//! Response representation.
//!
//! # Design Decisions
//! - Status 0 with a null reason means "no answer" (aborted or timed out)
//! - The Link header is stored serialized; [`Response::links`] parses it on
//!   demand and [`Response::set_links`] writes it back

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::headers::{HeaderMap, CONTENT_TYPE, LINK};
use crate::message::link::{parse_link_header, rewrite_link_header, serialize_links, Link};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Value,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "ok")
    }

    pub fn not_found() -> Self {
        Self::new(404, "not found")
    }

    pub fn internal_error() -> Self {
        Self::new(500, "internal server error")
    }

    /// The canonical "no answer" outcome.
    pub fn aborted() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_links(mut self, links: &[Link]) -> Self {
        self.set_links(links);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)
    }

    /// Parsed Link header, in header order.
    pub fn links(&self) -> Vec<Link> {
        self.headers
            .get(LINK)
            .map(parse_link_header)
            .unwrap_or_default()
    }

    pub fn set_links(&mut self, links: &[Link]) {
        if links.is_empty() {
            self.headers.remove(LINK);
        } else {
            self.headers.set(LINK, serialize_links(links));
        }
    }

    /// Apply `f` to every parsed link and store the result. Entries that
    /// fail to parse are kept as they were.
    pub fn update_links(&mut self, f: impl FnMut(&mut Link)) {
        if let Some(header) = self.headers.get(LINK) {
            let rewritten = rewrite_link_header(header, f);
            self.headers.set(LINK, rewritten);
        }
    }

    pub fn is_success(&self) -> bool {
        (100..400).contains(&self.status)
    }

    /// Body as text; strings are returned unquoted, null as empty.
    pub fn body_text(&self) -> String {
        match &self.body {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
