//! Bridge-side request correlation and outbound buffering.
//!
//! # Responsibilities
//! - Assign each outbound request an id and await the matching response
//! - Buffer protocol traffic until the context is active, then flush in order
//! - Fail every outstanding request when the channel terminates
//!
//! # Design Decisions
//! - Pending requests are registered under the state lock, so termination
//!   cannot miss one
//! - A pending entry is removed when its caller stops waiting; a response
//!   arriving after that is dropped
//! - Responses with no pending request are logged and dropped

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::bridge::envelope::{self, Envelope, ProtocolMessage};
use crate::bridge::BridgeError;
use crate::mediator::handler::{DispatchError, DispatchResult};
use crate::message::{Request, Response};
use crate::observability::metrics;

struct ChannelState {
    outbound: Option<mpsc::UnboundedSender<String>>,
    active: bool,
    terminated: bool,
    buffer: VecDeque<String>,
}

/// Host side of one bridge channel.
pub struct BridgeServer {
    label: String,
    log: bool,
    state: Mutex<ChannelState>,
    pending: DashMap<Uuid, oneshot::Sender<DispatchResult>>,
}

impl BridgeServer {
    pub fn new(label: impl Into<String>, log: bool, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            label: label.into(),
            log,
            state: Mutex::new(ChannelState {
                outbound: Some(outbound),
                active: false,
                terminated: false,
                buffer: VecDeque::new(),
            }),
            pending: DashMap::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Number of messages waiting for activation.
    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Number of requests awaiting a response.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue protocol traffic; held back until the context is active.
    pub fn channel_send_msg(&self, message: Envelope) -> Result<(), BridgeError> {
        let text = envelope::encode(&message)?;
        let mut state = self.lock();
        self.enqueue(&mut state, text)
    }

    /// Send immediately, whether or not the context is active.
    pub fn transmit(&self, message: &Envelope) -> Result<(), BridgeError> {
        let text = envelope::encode(message)?;
        let state = self.lock();
        self.write(&state, text)
    }

    fn enqueue(&self, state: &mut ChannelState, text: String) -> Result<(), BridgeError> {
        if state.terminated {
            return Err(BridgeError::ChannelClosed);
        }
        if state.active {
            self.write(state, text)
        } else {
            state.buffer.push_back(text);
            Ok(())
        }
    }

    fn write(&self, state: &ChannelState, text: String) -> Result<(), BridgeError> {
        let outbound = state.outbound.as_ref().ok_or(BridgeError::ChannelClosed)?;
        if self.log {
            tracing::debug!(domain = %self.label, message = %text, "Bridge sending");
        }
        outbound.send(text).map_err(|_| BridgeError::ChannelClosed)?;
        metrics::record_bridge_message("outbound");
        Ok(())
    }

    /// Mark the channel active and send everything buffered, in order.
    ///
    /// Only the first call does anything; returns the number flushed.
    pub fn flush_buffered_messages(&self) -> usize {
        let mut state = self.lock();
        if state.active || state.terminated {
            return 0;
        }
        state.active = true;
        let buffered: Vec<String> = state.buffer.drain(..).collect();
        let count = buffered.len();
        for text in buffered {
            if let Err(e) = self.write(&state, text) {
                tracing::warn!(domain = %self.label, error = %e, "Failed to flush buffered message");
            }
        }
        count
    }

    /// Send `request` and wait for the correlated response.
    pub async fn request(&self, request: &Request) -> DispatchResult {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            if state.terminated {
                return Err(DispatchError::Terminated);
            }
            let text = envelope::encode(&ProtocolMessage::request(id, request).into())
                .map_err(|_| DispatchError::Terminated)?;
            self.pending.insert(id, tx);
            if self.enqueue(&mut state, text).is_err() {
                self.pending.remove(&id);
                return Err(DispatchError::Terminated);
            }
        }

        let _guard = PendingGuard { pending: &self.pending, id };
        rx.await.unwrap_or(Err(DispatchError::Terminated))
    }

    /// Resolve the pending request a response message answers.
    pub fn on_channel_message(&self, message: ProtocolMessage) {
        let id = message.id;
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                if tx.send(Ok(message.into_response())).is_err() {
                    tracing::debug!(domain = %self.label, %id, "Discarding late response");
                }
            }
            None => {
                tracing::warn!(domain = %self.label, %id, "Dropping response with no pending request");
            }
        }
    }

    /// Settle a pending request with `response` when its answer was unreadable.
    pub fn reject_pending(&self, id: Uuid, response: Response) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                if tx.send(Ok(response)).is_err() {
                    tracing::debug!(domain = %self.label, %id, "Discarding late response");
                }
                true
            }
            None => false,
        }
    }

    /// Close the channel. Returns false if it was already terminated.
    pub fn terminate(&self) -> bool {
        let mut state = self.lock();
        if state.terminated {
            return false;
        }
        state.terminated = true;
        state.active = false;
        state.buffer.clear();
        state.outbound = None;

        let ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(DispatchError::Terminated));
            }
        }
        metrics::record_bridge_termination();
        true
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        self.terminate();
    }
}

struct PendingGuard<'a> {
    pending: &'a DashMap<Uuid, oneshot::Sender<DispatchResult>>,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::envelope::{decode, Control};
    use std::sync::Arc;

    fn protocol(text: &str) -> ProtocolMessage {
        match decode(text).unwrap() {
            Envelope::Protocol(message) => message,
            other => panic!("expected protocol message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn buffers_until_flushed_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = Arc::new(BridgeServer::new("worker", false, tx));

        let first = tokio::spawn({
            let server = server.clone();
            async move { server.request(&Request::get("httpl://worker/one")).await }
        });
        tokio::task::yield_now().await;
        let second = tokio::spawn({
            let server = server.clone();
            async move { server.request(&Request::get("httpl://worker/two")).await }
        });
        tokio::task::yield_now().await;
        while server.buffered() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err());

        assert_eq!(server.flush_buffered_messages(), 2);
        assert_eq!(server.flush_buffered_messages(), 0);

        let one = protocol(&rx.recv().await.unwrap());
        let two = protocol(&rx.recv().await.unwrap());
        assert_eq!(one.uri.as_deref(), Some("/one"));
        assert_eq!(two.uri.as_deref(), Some("/two"));

        server.on_channel_message(ProtocolMessage::response(two.id, Response::ok().with_body("2")));
        server.on_channel_message(ProtocolMessage::response(one.id, Response::ok().with_body("1")));
        assert_eq!(first.await.unwrap().unwrap().body_text(), "1");
        assert_eq!(second.await.unwrap().unwrap().body_text(), "2");
        assert_eq!(server.pending(), 0);
    }

    #[tokio::test]
    async fn control_messages_skip_the_buffer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = BridgeServer::new("worker", false, tx);
        server.transmit(&Control::Nullify { body: "fetch".into() }.into()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"{"op":"nullify","body":"fetch"}"#);
    }

    #[tokio::test]
    async fn terminate_fails_pending_requests_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = Arc::new(BridgeServer::new("worker", false, tx));
        server.flush_buffered_messages();

        let waiting = tokio::spawn({
            let server = server.clone();
            async move { server.request(&Request::get("httpl://worker/")).await }
        });
        rx.recv().await.unwrap();

        assert!(server.terminate());
        assert!(!server.terminate());
        assert!(matches!(waiting.await.unwrap(), Err(DispatchError::Terminated)));
        assert!(rx.recv().await.is_none());

        let late = server.request(&Request::get("httpl://worker/")).await;
        assert!(matches!(late, Err(DispatchError::Terminated)));
    }

    #[tokio::test]
    async fn unknown_response_ids_are_dropped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let server = BridgeServer::new("worker", false, tx);
        server.on_channel_message(ProtocolMessage::response(Uuid::new_v4(), Response::ok()));
        assert_eq!(server.pending(), 0);
        assert!(!server.is_terminated());
    }
}
