//! Channel bridge lifecycle and handshake.
//!
//! # States
//! ```text
//! Uninitialized → Bootstrapping: channel connected, reader started
//! Bootstrapping → Ready:         context sent `ready`
//! Ready → Active:                context sent `loaded` without error
//! Ready → Failed:                context sent `loaded` with an error
//! Active | Failed → Terminated:  terminate(), context `terminate`, channel closed
//! ```
//!
//! # Handshake
//! With host privileges the bridge sends `nullify` for each configured
//! capability, then `configure`, then `importScripts`. Without them the
//! context is already configured and the bridge proceeds as if loaded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use base64::prelude::*;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::bridge::envelope::{self, Control, Envelope, ProtocolMessage, ScriptUrls};
use crate::bridge::server::BridgeServer;
use crate::bridge::{BridgeError, ContextSpawner, Endpoint, LoadCallback, ServerFn};
use crate::config::BridgeConfig;
use crate::mediator::{Handler, HandlerError, HandlerResult, Mediator};
use crate::message::{Request, Response};
use crate::observability::metrics;

const INLINE_SCRIPT_PREFIX: &str = "data:application/javascript,";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Bootstrapping,
    Ready,
    Active,
    Failed,
    Terminated,
}

/// A handler whose requests are answered by an isolated execution context.
///
/// Cheap to clone; clones share one channel.
#[derive(Clone)]
pub struct ChannelBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    label: String,
    server: BridgeServer,
    lifecycle: Mutex<Lifecycle>,
    host_privileges: AtomicBool,
    load_cb: Option<LoadCallback>,
    server_fn: Option<ServerFn>,
}

/// Builds a [`ChannelBridge`].
pub struct BridgeBuilder {
    config: BridgeConfig,
    load_cb: Option<LoadCallback>,
    server_fn: Option<ServerFn>,
}

impl BridgeBuilder {
    /// Called with the `loaded` payload, before the bridge activates.
    pub fn on_load(mut self, f: impl Fn(Option<&Value>) + Send + Sync + 'static) -> Self {
        self.load_cb = Some(Box::new(f));
        self
    }

    /// Answer requests the context sends to its host.
    pub fn serve<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Response> + Send + 'static,
    {
        self.server_fn = Some(Arc::new(move |request: Request| -> BoxFuture<'static, Response> {
            f(request).boxed()
        }));
        self
    }

    pub fn server_fn(mut self, f: ServerFn) -> Self {
        self.server_fn = Some(f);
        self
    }

    /// Start a context through `spawner` and connect to it.
    pub fn spawn(self, spawner: &dyn ContextSpawner) -> Result<ChannelBridge, BridgeError> {
        if self.config.src.trim().is_empty() {
            return Err(BridgeError::MissingSource);
        }
        let endpoint = spawner.spawn(&self.config)?;
        self.connect(endpoint)
    }

    /// Connect to a context already listening on `endpoint`.
    ///
    /// Must be called within a Tokio runtime; the reader task is spawned on it.
    pub fn connect(self, endpoint: Endpoint) -> Result<ChannelBridge, BridgeError> {
        if self.config.src.trim().is_empty() {
            return Err(BridgeError::MissingSource);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| BridgeError::Spawn(e.to_string()))?;

        let Endpoint { tx, rx } = endpoint;
        let label = self.config.label();
        let inner = Arc::new(BridgeInner {
            server: BridgeServer::new(label.clone(), self.config.log, tx),
            label,
            config: self.config,
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            host_privileges: AtomicBool::new(true),
            load_cb: self.load_cb,
            server_fn: self.server_fn,
        });

        inner.transition(Lifecycle::Uninitialized, Lifecycle::Bootstrapping);
        runtime.spawn(read_loop(Arc::downgrade(&inner), rx));
        tracing::debug!(domain = %inner.label, src = %inner.config.src, "Bridge bootstrapping");

        Ok(ChannelBridge { inner })
    }
}

impl ChannelBridge {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder {
            config,
            load_cb: None,
            server_fn: None,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.lifecycle()
    }

    pub fn is_active(&self) -> bool {
        self.inner.server.is_active()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.server.is_terminated()
    }

    /// Whether the context granted configuration rights to this bridge.
    pub fn has_host_privileges(&self) -> bool {
        self.inner.host_privileges.load(Ordering::Acquire)
    }

    /// Ask the context to strip a capability.
    pub fn nullify(&self, name: &str) -> Result<(), BridgeError> {
        self.inner.server.transmit(&Control::Nullify { body: name.to_string() }.into())
    }

    /// Ask the context to load scripts.
    pub fn import_scripts(&self, urls: Vec<String>) -> Result<(), BridgeError> {
        self.inner
            .server
            .transmit(&Control::ImportScripts { body: ScriptUrls::Many(urls) }.into())
    }

    /// Close the channel and fail outstanding requests. Idempotent.
    pub fn terminate(&self) {
        self.inner.terminate();
    }
}

impl std::fmt::Debug for ChannelBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelBridge")
            .field("label", &self.inner.label)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

impl Handler for ChannelBridge {
    fn receive<'a>(&'a self, request: Request, _mediator: &'a Mediator) -> BoxFuture<'a, HandlerResult> {
        async move { self.inner.server.request(&request).await.map_err(HandlerError::from) }.boxed()
    }
}

async fn read_loop(bridge: Weak<BridgeInner>, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        let Some(inner) = bridge.upgrade() else {
            return;
        };
        inner.on_port_message(&text);
    }
    if let Some(inner) = bridge.upgrade() {
        if !inner.server.is_terminated() {
            tracing::warn!(domain = %inner.label, "Channel closed by context");
            inner.terminate();
        }
    }
}

impl BridgeInner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        let mut state = self.lifecycle();
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    fn transmit(&self, control: Control) {
        let op = control.op();
        if let Err(e) = self.server.transmit(&control.into()) {
            tracing::warn!(domain = %self.label, op, error = %e, "Failed to send control message");
        }
    }

    fn on_port_message(self: &Arc<Self>, text: &str) {
        if self.server.is_terminated() {
            tracing::debug!(domain = %self.label, "Discarding message after termination");
            return;
        }
        if self.config.log {
            tracing::debug!(domain = %self.label, message = %text, "Bridge received");
        }
        metrics::record_bridge_message("inbound");

        let message = match envelope::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(domain = %self.label, error = %e, "Invalid message from context");
                if let Some(id) = envelope::correlation_id(text) {
                    self.server.reject_pending(id, Response::new(502, "bad gateway"));
                }
                return;
            }
        };

        match message {
            Envelope::Control(Control::Ready { body }) => self.on_ready(body.host_privileges),
            Envelope::Control(Control::Loaded { body }) => self.on_loaded(body),
            Envelope::Control(Control::Log { body }) => self.on_log(body),
            Envelope::Control(Control::Terminate) => {
                tracing::info!(domain = %self.label, "Context closed itself");
                self.terminate();
            }
            Envelope::Control(other) => {
                tracing::error!(domain = %self.label, op = other.op(), "Unexpected control message from context");
            }
            Envelope::Protocol(message) if message.is_response() => self.server.on_channel_message(message),
            Envelope::Protocol(message) => self.handle_remote_request(message),
        }
    }

    fn on_ready(&self, host_privileges: bool) {
        if !self.transition(Lifecycle::Bootstrapping, Lifecycle::Ready) {
            tracing::warn!(domain = %self.label, "Ignoring unexpected ready");
            return;
        }
        self.host_privileges.store(host_privileges, Ordering::Release);

        if !host_privileges {
            tracing::debug!(domain = %self.label, "Context already configured");
            self.on_loaded(None);
            return;
        }

        for capability in &self.config.nullify {
            self.transmit(Control::Nullify { body: capability.clone() });
        }
        match serde_json::to_value(&self.config) {
            Ok(body) => self.transmit(Control::Configure { body }),
            Err(e) => tracing::error!(domain = %self.label, error = %e, "Failed to encode bridge config"),
        }
        self.transmit(Control::ImportScripts {
            body: ScriptUrls::One(encode_inline_source(&self.config.src)),
        });
    }

    fn on_loaded(&self, body: Option<Value>) {
        if *self.lifecycle() != Lifecycle::Ready {
            tracing::warn!(domain = %self.label, "Ignoring unexpected loaded");
            return;
        }
        if let Some(cb) = &self.load_cb {
            cb(body.as_ref());
        }

        let error = body
            .as_ref()
            .and_then(|b| b.get("error"))
            .filter(|e| !e.is_null() && **e != Value::Bool(false));
        if let Some(error) = error {
            tracing::error!(domain = %self.label, error = %error, "Failed to load script in context, terminating");
            self.transition(Lifecycle::Ready, Lifecycle::Failed);
            self.terminate();
            return;
        }

        self.transition(Lifecycle::Ready, Lifecycle::Active);
        let flushed = self.server.flush_buffered_messages();
        tracing::debug!(domain = %self.label, flushed, "Bridge active");
    }

    fn on_log(&self, body: Value) {
        let Value::Array(mut args) = body else {
            tracing::error!(domain = %self.label, "Received invalid log message: payload must be an array");
            return;
        };
        let severity = if args.is_empty() { Value::Null } else { args.remove(0) };
        let text = args
            .iter()
            .map(|arg| match arg {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");

        match severity.as_str() {
            Some("error") => tracing::error!(domain = %self.label, "{}", text),
            Some("warn") => tracing::warn!(domain = %self.label, "{}", text),
            _ => tracing::info!(domain = %self.label, "{}", text),
        }
    }

    fn handle_remote_request(self: &Arc<Self>, message: ProtocolMessage) {
        let inner = Arc::clone(self);
        let request = message.to_request();
        let id = message.id;
        tokio::spawn(async move {
            let response = match &inner.server_fn {
                Some(server) => server(request).await,
                None => Response::new(500, "server not implemented"),
            };
            if let Err(e) = inner.server.channel_send_msg(ProtocolMessage::response(id, response).into()) {
                tracing::warn!(domain = %inner.label, %id, error = %e, "Failed to answer context request");
            }
        });
    }

    fn terminate(&self) {
        if self.server.terminate() {
            *self.lifecycle() = Lifecycle::Terminated;
            tracing::info!(domain = %self.label, "Bridge terminated");
        }
    }
}

/// Inline sources are sent base64-encoded so they survive as a script URL.
pub fn encode_inline_source(src: &str) -> String {
    match src.strip_prefix(INLINE_SCRIPT_PREFIX) {
        Some(code) => format!("data:application/javascript;base64,{}", BASE64_STANDARD.encode(code)),
        None => src.to_string(),
    }
}
