//! Request construction and cancellation.
//!
//! # Responsibilities
//! - Build requests from a method and URL, or from loose JSON-style options
//! - Merge convenience header fields into the explicit header map
//! - Encode the query mapping into the dispatched URI
//! - Carry an abort signal shared by every clone of the request
//!
//! # Design Decisions
//! - Methods are uppercased at construction
//! - URLs without a scheme are rooted at the local-authority scheme
//! - On a header collision the explicit map wins over convenience fields
//! - `end()` and `close()` are the same idempotent abort

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::mediator::uri::{self, Target};
use crate::message::headers::HeaderMap;

/// Shared cancellation flag for one request.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Abort the request. Further calls have no effect.
    pub fn abort(&self) {
        self.tx.send_if_modified(|aborted| !std::mem::replace(aborted, true));
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// A request addressed by URI.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub query: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub body: Value,
    pub timeout: Option<Duration>,
    abort: AbortHandle,
}

impl Request {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            url: uri::with_default_scheme(url),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: Value::Null,
            timeout: None,
            abort: AbortHandle::new(),
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: &str) -> Self {
        Self::new("POST", url)
    }

    pub fn put(url: &str) -> Self {
        Self::new("PUT", url)
    }

    pub fn delete(url: &str) -> Self {
        Self::new("DELETE", url)
    }

    /// Build a request from loose options, see [`RequestOptions`].
    pub fn from_options(options: RequestOptions) -> Self {
        let mut request = Self::new(options.method.as_deref().unwrap_or("GET"), &options.url);
        request.query = options.query;
        request.body = options.body;
        request.timeout = options.timeout.map(Duration::from_millis);

        let mut sugar = HeaderMap::new();
        for (name, value) in options.extra {
            match value {
                Value::String(s) => sugar.set(&name, s),
                Value::Number(n) => sugar.set(&name, n.to_string()),
                Value::Bool(b) => sugar.set(&name, b.to_string()),
                other => tracing::debug!(field = %name, value = %other, "Ignoring non-scalar request field"),
            }
        }
        request.headers = options.headers;
        request.headers.merge_missing(&sugar);
        request
    }

    /// Parse loose JSON options into a request.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        Ok(Self::from_options(serde_json::from_value(value)?))
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.insert(key.to_string(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The URL with the query mapping encoded onto it.
    pub fn uri(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, separator, encoded)
    }

    /// Parsed routing target of [`Request::uri`].
    pub fn target(&self) -> Target {
        Target::parse(&self.uri())
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Abort the request; its dispatch settles to the canonical aborted response.
    pub fn end(&self) {
        self.abort.abort();
    }

    /// Same as [`Request::end`].
    pub fn close(&self) {
        self.abort.abort();
    }
}

/// Loose request options, as written by callers building requests from JSON.
///
/// Unknown top-level fields are convenience headers, e.g.
/// `{"method": "post", "url": "...", "Content_Type": "text/plain"}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestOptions {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(alias = "uri")]
    pub url: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Value,
    /// Timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}
