//! Channel-backed bridges to isolated execution contexts.
//!
//! # Data Flow
//! ```text
//! Mediator → ChannelBridge::receive
//!     → server.rs (correlate by id, buffer until active)
//!     → envelope.rs (encode JSON text)
//!     → Endpoint (message-passing channel)
//!     → execution context (context.rs, or any ContextSpawner)
//!     → response message → server.rs resolves the pending request
//! ```
//!
//! # Design Decisions
//! - The channel is the only thing shared with a context; messages are JSON text
//! - Protocol traffic is buffered until the context reports its script loaded
//! - Control traffic (configure, nullify, importScripts) bypasses the buffer
//! - Termination is idempotent and fails every outstanding request

pub mod channel;
pub mod context;
pub mod envelope;
pub mod server;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::BridgeConfig;
use crate::message::{Request, Response};

pub use channel::{BridgeBuilder, ChannelBridge, Lifecycle};
pub use context::{ContextScope, LocalContextHost, ScriptRegistry};
pub use envelope::{Control, Envelope, ProtocolMessage};
pub use server::BridgeServer;

/// Answers requests a context sends to its host.
pub type ServerFn = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Called with the `loaded` payload before the bridge activates.
pub type LoadCallback = Box<dyn Fn(Option<&serde_json::Value>) + Send + Sync>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge requires config with `src`")]
    MissingSource,

    #[error("malformed channel message: {0}")]
    Malformed(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("failed to start execution context: {0}")]
    Spawn(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One side of a bridge channel.
#[derive(Debug)]
pub struct Endpoint {
    pub tx: mpsc::UnboundedSender<String>,
    pub rx: mpsc::UnboundedReceiver<String>,
}

impl Endpoint {
    /// Two connected endpoints.
    pub fn pair() -> (Endpoint, Endpoint) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Endpoint { tx: a_tx, rx: b_rx }, Endpoint { tx: b_tx, rx: a_rx })
    }
}

/// Starts execution contexts for bridges.
pub trait ContextSpawner: Send + Sync {
    /// Start (or, for shared configs, connect to) a context and return the
    /// bridge's end of its channel.
    fn spawn(&self, config: &BridgeConfig) -> Result<Endpoint, BridgeError>;
}
