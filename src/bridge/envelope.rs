//! Channel message envelope.
//!
//! # Wire Format
//! ```text
//! control:  { "op": "ready" | "loaded" | "log" | "terminate"
//!                 | "configure" | "nullify" | "importScripts", "body": ... }
//! protocol: { "id": <uuid>, "method", "uri", "headers", "body" }          request
//!           { "id": <uuid>, "status", "reason", "headers", "body" }       response
//! ```
//!
//! # Design Decisions
//! - Messages cross the channel as JSON text, never shared memory
//! - Decoded once at the boundary into [`Envelope`]; callers match on it
//! - A message with an `op` field is always control traffic

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::bridge::BridgeError;
use crate::message::{HeaderMap, Request, Response};

/// A decoded channel message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Control(Control),
    Protocol(ProtocolMessage),
}

/// Control operations between a bridge and its execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Control {
    /// Context → bridge: bootstrap can accept commands.
    Ready {
        #[serde(default)]
        body: ReadyBody,
    },
    /// Context → bridge: user script finished loading, `{"error": ...}` on failure.
    Loaded {
        #[serde(default)]
        body: Option<Value>,
    },
    /// Context → bridge: `[severity, args...]`.
    Log {
        #[serde(default)]
        body: Value,
    },
    /// Either direction: the context is shutting down.
    Terminate,
    /// Bridge → context: full bridge configuration.
    Configure { body: Value },
    /// Bridge → context: strip a named capability.
    Nullify { body: String },
    /// Bridge → context: load scripts.
    ImportScripts { body: ScriptUrls },
}

impl Control {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Loaded { .. } => "loaded",
            Self::Log { .. } => "log",
            Self::Terminate => "terminate",
            Self::Configure { .. } => "configure",
            Self::Nullify { .. } => "nullify",
            Self::ImportScripts { .. } => "importScripts",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyBody {
    #[serde(default)]
    pub host_privileges: bool,
}

/// One script URL or several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptUrls {
    One(String),
    Many(Vec<String>),
}

impl ScriptUrls {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(url) => vec![url],
            Self::Many(urls) => urls,
        }
    }
}

/// Ordinary request/response traffic, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolMessage {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Value,
}

impl ProtocolMessage {
    /// Request addressed below the bridge's authority.
    pub fn request(id: Uuid, request: &Request) -> Self {
        Self {
            id,
            method: Some(request.method.clone()),
            uri: Some(request.target().remainder()),
            status: None,
            reason: None,
            headers: request.headers.clone(),
            body: request.body.clone(),
        }
    }

    pub fn response(id: Uuid, response: Response) -> Self {
        Self {
            id,
            method: None,
            uri: None,
            status: Some(response.status),
            reason: response.reason,
            headers: response.headers,
            body: response.body,
        }
    }

    pub fn is_response(&self) -> bool {
        self.status.is_some()
    }

    pub fn to_request(&self) -> Request {
        let mut request = Request::new(
            self.method.as_deref().unwrap_or("GET"),
            self.uri.as_deref().unwrap_or("/"),
        );
        request.headers = self.headers.clone();
        request.body = self.body.clone();
        request
    }

    pub fn into_response(self) -> Response {
        Response {
            status: self.status.unwrap_or(0),
            reason: self.reason,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl From<Control> for Envelope {
    fn from(control: Control) -> Self {
        Self::Control(control)
    }
}

impl From<ProtocolMessage> for Envelope {
    fn from(message: ProtocolMessage) -> Self {
        Self::Protocol(message)
    }
}

pub fn encode(envelope: &Envelope) -> Result<String, BridgeError> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn decode(text: &str) -> Result<Envelope, BridgeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| BridgeError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(BridgeError::Malformed("payload missing".into()));
    }
    if value.get("op").is_some() {
        serde_json::from_value(value)
            .map(Envelope::Control)
            .map_err(|e| BridgeError::Malformed(e.to_string()))
    } else {
        serde_json::from_value(value)
            .map(Envelope::Protocol)
            .map_err(|e| BridgeError::Malformed(e.to_string()))
    }
}

/// The correlation id of protocol traffic that failed to decode, if it has one.
pub fn correlation_id(text: &str) -> Option<Uuid> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("op").is_some() {
        return None;
    }
    value.get("id")?.as_str()?.parse().ok()
}
