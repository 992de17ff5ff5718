//! In-process execution contexts.
//!
//! # Responsibilities
//! - Run registered scripts in their own task, reachable only over a channel
//! - Speak the context side of the bridge handshake
//! - Share one context between bridges with the same namespace
//!
//! # Design Decisions
//! - Scripts are looked up by name; a `data:` URL carries the name inline
//! - The first bridge to connect to a context gets host privileges
//! - A context stops when its last channel closes or a script closes it

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::bridge::envelope::{self, Control, Envelope, ProtocolMessage, ReadyBody};
use crate::bridge::{BridgeError, ContextSpawner, Endpoint, ServerFn};
use crate::config::BridgeConfig;
use crate::message::{Request, Response};
use crate::schemes::data;

/// Capabilities a fresh context starts with.
pub const DEFAULT_CAPABILITIES: &[&str] = &["importScripts", "fetch", "XMLHttpRequest", "WebSocket", "EventSource"];

/// A script body: runs once against the context scope when imported.
pub type Script = Arc<dyn Fn(&mut ContextScope) -> Result<(), String> + Send + Sync>;

/// Scripts a [`LocalContextHost`] can load, by name.
#[derive(Clone, Default)]
pub struct ScriptRegistry {
    scripts: Arc<DashMap<String, Script>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: &str, script: F)
    where
        F: Fn(&mut ContextScope) -> Result<(), String> + Send + Sync + 'static,
    {
        self.scripts.insert(name.to_string(), Arc::new(script));
    }

    /// The script a URL names; `data:` URLs carry the name as their payload.
    pub fn resolve(&self, url: &str) -> Result<Script, String> {
        let name = if url.starts_with("data:") {
            data::decode(url).map_err(|e| e.to_string())?.text()
        } else {
            url.to_string()
        };
        self.scripts
            .get(&name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| format!("script not found: {}", name))
    }
}

/// What a script sees of its context.
pub struct ContextScope {
    config: Value,
    capabilities: BTreeSet<String>,
    server: Option<ServerFn>,
    outbox: Vec<Control>,
    closing: bool,
}

impl ContextScope {
    fn new() -> Self {
        Self {
            config: Value::Null,
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            server: None,
            outbox: Vec::new(),
            closing: false,
        }
    }

    /// The bridge configuration the context was configured with.
    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    /// Answer requests arriving over the channel.
    pub fn serve<F, Fut>(&mut self, f: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Response> + Send + 'static,
    {
        self.server = Some(Arc::new(move |request: Request| -> BoxFuture<'static, Response> {
            f(request).boxed()
        }));
    }

    /// Send a log line to the importing bridge.
    pub fn log(&mut self, severity: &str, message: impl Into<String>) {
        let message: String = message.into();
        self.outbox.push(Control::Log {
            body: json!([severity, message]),
        });
    }

    /// Shut the context down once the current message is handled.
    pub fn close(&mut self) {
        self.closing = true;
    }
}

/// Spawns [`ContextScope`]-backed contexts as Tokio tasks.
pub struct LocalContextHost {
    scripts: ScriptRegistry,
    shared: DashMap<String, mpsc::UnboundedSender<Endpoint>>,
}

impl LocalContextHost {
    pub fn new(scripts: ScriptRegistry) -> Self {
        Self {
            scripts,
            shared: DashMap::new(),
        }
    }

    pub fn scripts(&self) -> &ScriptRegistry {
        &self.scripts
    }

    fn start(&self, name: String, runtime: &tokio::runtime::Handle) -> mpsc::UnboundedSender<Endpoint> {
        let (joins_tx, joins_rx) = mpsc::unbounded_channel();
        tracing::debug!(context = %name, "Starting execution context");
        let (context, inbox) = ExecutionContext::new(name, self.scripts.clone());
        runtime.spawn(run_context(context, inbox, joins_rx));
        joins_tx
    }
}

impl ContextSpawner for LocalContextHost {
    fn spawn(&self, config: &BridgeConfig) -> Result<Endpoint, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| BridgeError::Spawn(e.to_string()))?;
        let (bridge_end, context_end) = Endpoint::pair();
        let exited = |_| BridgeError::Spawn("execution context exited".into());

        if !config.shared {
            self.start(config.label(), &runtime).send(context_end).map_err(exited)?;
            return Ok(bridge_end);
        }

        let namespace = config.namespace().to_string();
        let mut joins = self
            .shared
            .entry(namespace.clone())
            .or_insert_with(|| self.start(namespace.clone(), &runtime));
        if let Err(mpsc::error::SendError(context_end)) = joins.send(context_end) {
            *joins = self.start(namespace, &runtime);
            joins.send(context_end).map_err(exited)?;
        }
        Ok(bridge_end)
    }
}

struct ExecutionContext {
    name: String,
    scripts: ScriptRegistry,
    scope: ContextScope,
    connections: HashMap<u64, mpsc::UnboundedSender<String>>,
    next_id: u64,
    inbox: mpsc::UnboundedSender<(u64, Option<String>)>,
}

impl ExecutionContext {
    fn new(name: String, scripts: ScriptRegistry) -> (Self, mpsc::UnboundedReceiver<(u64, Option<String>)>) {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let context = Self {
            name,
            scripts,
            scope: ContextScope::new(),
            connections: HashMap::new(),
            next_id: 0,
            inbox,
        };
        (context, inbox_rx)
    }

    fn attach(&mut self, endpoint: Endpoint) {
        let id = self.next_id;
        self.next_id += 1;
        let Endpoint { tx, mut rx } = endpoint;

        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if inbox.send((id, Some(text))).is_err() {
                    return;
                }
            }
            let _ = inbox.send((id, None));
        });

        let ready = Control::Ready {
            body: ReadyBody { host_privileges: id == 0 },
        };
        send(&tx, ready.into());
        self.connections.insert(id, tx);
        tracing::debug!(context = %self.name, connection = id, "Bridge connected");
    }

    /// Handle one message; returns false when the context should stop.
    fn on_message(&mut self, conn: u64, text: &str) -> bool {
        let message = match envelope::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(context = %self.name, error = %e, "Invalid message from bridge");
                return true;
            }
        };

        match message {
            Envelope::Control(Control::Configure { body }) => self.scope.config = body,
            Envelope::Control(Control::Nullify { body }) => {
                self.scope.capabilities.remove(&body);
            }
            Envelope::Control(Control::ImportScripts { body }) => {
                let body = self.import(body.into_vec()).err().map(|error| json!({ "error": error }));
                self.reply(conn, Control::Loaded { body }.into());
            }
            Envelope::Control(Control::Terminate) => return false,
            Envelope::Control(other) => {
                tracing::debug!(context = %self.name, op = other.op(), "Ignoring control message");
            }
            Envelope::Protocol(message) if message.is_response() => {
                tracing::debug!(context = %self.name, id = %message.id, "Dropping unsolicited response");
            }
            Envelope::Protocol(message) => self.handle_request(conn, message),
        }

        for log in std::mem::take(&mut self.scope.outbox) {
            self.reply(conn, log.into());
        }
        if self.scope.closing {
            for tx in self.connections.values() {
                send(tx, Control::Terminate.into());
            }
            return false;
        }
        true
    }

    fn import(&mut self, urls: Vec<String>) -> Result<(), String> {
        for url in urls {
            let script = self.scripts.resolve(&url)?;
            script(&mut self.scope)?;
        }
        Ok(())
    }

    fn handle_request(&self, conn: u64, message: ProtocolMessage) {
        let Some(tx) = self.connections.get(&conn).cloned() else {
            return;
        };
        let id = message.id;
        match self.scope.server.clone() {
            Some(server) => {
                let request = message.to_request();
                tokio::spawn(async move {
                    let response = server(request).await;
                    send(&tx, ProtocolMessage::response(id, response).into());
                });
            }
            None => send(
                &tx,
                ProtocolMessage::response(id, Response::new(500, "server not implemented")).into(),
            ),
        }
    }

    fn reply(&self, conn: u64, message: Envelope) {
        if let Some(tx) = self.connections.get(&conn) {
            send(tx, message);
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, message: Envelope) {
    match envelope::encode(&message) {
        Ok(text) => {
            // the bridge closing first is normal
            let _ = tx.send(text);
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode context message"),
    }
}

async fn run_context(
    mut context: ExecutionContext,
    mut inbox: mpsc::UnboundedReceiver<(u64, Option<String>)>,
    mut joins: mpsc::UnboundedReceiver<Endpoint>,
) {
    let mut accepting = true;
    loop {
        tokio::select! {
            joined = joins.recv(), if accepting => match joined {
                Some(endpoint) => context.attach(endpoint),
                None => accepting = false,
            },
            Some((conn, message)) = inbox.recv() => match message {
                Some(text) => {
                    if !context.on_message(conn, &text) {
                        break;
                    }
                }
                None => {
                    context.connections.remove(&conn);
                    if context.connections.is_empty() {
                        break;
                    }
                }
            },
        }
    }
    tracing::debug!(context = %context.name, "Execution context stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn recv(endpoint: &mut Endpoint) -> Envelope {
        let text = tokio::time::timeout(Duration::from_secs(1), endpoint.rx.recv())
            .await
            .expect("timed out waiting for context")
            .expect("channel closed");
        envelope::decode(&text).unwrap()
    }

    fn post(endpoint: &Endpoint, message: Envelope) {
        endpoint.tx.send(envelope::encode(&message).unwrap()).unwrap();
    }

    fn host() -> LocalContextHost {
        let scripts = ScriptRegistry::new();
        scripts.register("echo", |scope| {
            scope.log("info", "echo loaded");
            scope.serve(|request| async move { Response::ok().with_body(request.body) });
            Ok(())
        });
        scripts.register("broken", |_| Err("boom".to_string()));
        LocalContextHost::new(scripts)
    }

    #[tokio::test]
    async fn exclusive_context_speaks_handshake() {
        let host = host();
        let mut end = host.spawn(&BridgeConfig::new("echo")).unwrap();
        assert_eq!(
            recv(&mut end).await,
            Control::Ready {
                body: ReadyBody { host_privileges: true }
            }
            .into()
        );

        post(&end, Control::Nullify { body: "fetch".into() }.into());
        post(&end, Control::ImportScripts { body: envelope::ScriptUrls::One("echo".into()) }.into());
        assert_eq!(recv(&mut end).await, Control::Loaded { body: None }.into());
        assert!(matches!(recv(&mut end).await, Envelope::Control(Control::Log { .. })));

        let id = uuid::Uuid::new_v4();
        post(&end, ProtocolMessage::request(id, &Request::post("httpl://w/").with_body("hi")).into());
        match recv(&mut end).await {
            Envelope::Protocol(message) => {
                assert_eq!(message.id, id);
                assert_eq!(message.into_response().body, json!("hi"));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_or_failing_scripts_report_load_errors() {
        let host = host();
        let mut end = host.spawn(&BridgeConfig::new("broken")).unwrap();
        recv(&mut end).await;

        post(&end, Control::ImportScripts { body: envelope::ScriptUrls::One("broken".into()) }.into());
        assert_eq!(recv(&mut end).await, Control::Loaded { body: Some(json!({ "error": "boom" })) }.into());

        post(&end, Control::ImportScripts { body: envelope::ScriptUrls::One("missing".into()) }.into());
        assert_eq!(
            recv(&mut end).await,
            Control::Loaded { body: Some(json!({ "error": "script not found: missing" })) }.into()
        );
    }

    #[tokio::test]
    async fn inline_data_urls_name_the_script() {
        let registry = host().scripts().clone();
        assert!(registry.resolve("data:application/javascript;base64,ZWNobw==").is_ok());
        assert!(registry.resolve("data:application/javascript,echo").is_ok());
        assert!(registry.resolve("data:application/javascript,nope").is_err());
    }

    #[tokio::test]
    async fn shared_contexts_privilege_only_the_first_bridge() {
        let host = host();
        let config = BridgeConfig {
            shared: true,
            namespace: Some("pool".into()),
            ..BridgeConfig::new("echo")
        };
        let mut first = host.spawn(&config).unwrap();
        let mut second = host.spawn(&config).unwrap();

        assert_eq!(
            recv(&mut first).await,
            Control::Ready { body: ReadyBody { host_privileges: true } }.into()
        );
        assert_eq!(
            recv(&mut second).await,
            Control::Ready { body: ReadyBody { host_privileges: false } }.into()
        );
    }

    #[tokio::test]
    async fn context_stops_when_its_channel_closes() {
        let host = host();
        let mut end = host.spawn(&BridgeConfig::new("echo")).unwrap();
        recv(&mut end).await;
        let Endpoint { tx, mut rx } = end;
        drop(tx);
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}
