//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a mediator.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration for a mediator.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Mediator name, used in logs.
    pub name: String,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Static services served by local authority.
    pub services: Vec<ServiceConfig>,

    /// Channel-backed bridges to isolated execution contexts.
    pub bridges: Vec<BridgeConfig>,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            name: "httpl".to_string(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
            services: Vec::new(),
            bridges: Vec::new(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default request timeout in milliseconds, for requests without their own.
    pub request_ms: Option<u64>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Mirror every request/response pair to the traffic log.
    pub log_traffic: bool,

    /// Record dispatch and bridge metrics.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_traffic: false,
            metrics_enabled: true,
        }
    }
}

/// A static service answering fixed responses under one authority.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Authority the service is registered under (e.g., "status.local").
    pub authority: String,

    #[serde(default)]
    pub routes: Vec<ServiceRouteConfig>,
}

/// One fixed response of a static service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceRouteConfig {
    /// Exact path to match.
    pub path: String,

    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default = "default_reason")]
    pub reason: String,

    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub body: Value,

    /// Link header values.
    #[serde(default)]
    pub links: Vec<String>,
}

fn default_status() -> u16 {
    200
}

fn default_reason() -> String {
    "ok".to_string()
}

/// Channel-backed bridge configuration.
///
/// Sent verbatim to the execution context in the `configure` message, so
/// field names follow the wire spelling.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Authority the bridge is registered under. Defaults to a label
    /// derived from `src` for logging.
    #[serde(default)]
    pub domain: Option<String>,

    /// Script to load into the context (required).
    pub src: String,

    /// Connect to a shared context rather than an exclusive one.
    #[serde(default)]
    pub shared: bool,

    /// Shared context name; defaults to `src`.
    #[serde(default)]
    pub namespace: Option<String>,

    /// Capabilities to strip from the context before the script runs.
    #[serde(default)]
    pub nullify: Vec<String>,

    /// Bootstrap the context runs before accepting commands.
    ///
    /// Only sent to the context inside `configure`; spawners that start real
    /// processes read it. `LocalContextHost` runs registered scripts directly
    /// and ignores it.
    #[serde(default, alias = "bootstrap_url")]
    pub bootstrap_url: Option<String>,

    /// Log every channel message.
    #[serde(default)]
    pub log: bool,
}

impl BridgeConfig {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Self::default()
        }
    }

    /// Label used in logs: the domain, or the start of `src`.
    pub fn label(&self) -> String {
        match &self.domain {
            Some(domain) => domain.clone(),
            None => format!("<{}>", self.src.chars().take(40).collect::<String>()),
        }
    }

    /// Name of the shared context this bridge connects to.
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(&self.src)
    }
}
