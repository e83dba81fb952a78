//! In-memory connector for exercising the client without a network.
//!
//! ```ignore
//! let (connector, controller) = testing::fake();
//! controller.respond_with("rooms:list", json!({"success": true, "items": []}));
//! let client = RealtimeClient::new(config, Arc::new(connector), credentials);
//! client.connect().await?;
//! controller.inject_event("metric-updated", "room1", json!({"player_count": 3}), 1000);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use roomdesk_core::{Result, SyncError};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::{Connector, Transport};

/// Canned answer to a request name.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Respond with `{"id", "result"}`.
    Result(Value),
    /// Respond with `{"id", "error": {"code", "message"}}`.
    Error {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },
}

struct Link {
    inbound: mpsc::UnboundedSender<String>,
    kill: CancellationToken,
}

#[derive(Default)]
struct FakeState {
    refuse: Option<SyncError>,
    connects: usize,
    credentials: Vec<String>,
    link: Option<Link>,
    sent: Vec<Value>,
    replies: HashMap<String, Reply>,
    client_closes: usize,
}

/// Create a connected connector/controller pair.
pub fn fake() -> (FakeConnector, FakeController) {
    let state = Arc::new(Mutex::new(FakeState::default()));
    (
        FakeConnector {
            state: Arc::clone(&state),
        },
        FakeController { state },
    )
}

/// Connector half, handed to the client.
#[derive(Clone)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, credential: &str) -> Result<Box<dyn Transport>> {
        let mut state = self.state.lock();
        state.connects += 1;
        state.credentials.push(credential.to_string());
        if let Some(err) = state.refuse.clone() {
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let kill = CancellationToken::new();
        if let Some(previous) = state.link.replace(Link {
            inbound: tx.clone(),
            kill: kill.clone(),
        }) {
            previous.kill.cancel();
        }

        Ok(Box::new(FakeTransport {
            inbound_rx: rx,
            loopback: tx,
            kill,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeTransport {
    inbound_rx: mpsc::UnboundedReceiver<String>,
    loopback: mpsc::UnboundedSender<String>,
    kill: CancellationToken,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        if self.kill.is_cancelled() {
            return Err(SyncError::Transport("link dropped".into()));
        }
        let value: Value = serde_json::from_str(&frame)
            .map_err(|e| SyncError::Validation(format!("client sent invalid JSON: {e}")))?;

        let reply = {
            let mut state = self.state.lock();
            state.sent.push(value.clone());
            let name = value.get("name").and_then(Value::as_str);
            let id = value.get("id").and_then(Value::as_u64);
            match (id, name.and_then(|n| state.replies.get(n))) {
                (Some(id), Some(reply)) => Some(reply_frame(id, reply)),
                _ => None,
            }
        };
        if let Some(reply) = reply {
            let _ = self.loopback.send(reply.to_string());
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        tokio::select! {
            biased;
            msg = self.inbound_rx.recv() => msg.map(Ok),
            () = self.kill.cancelled() => None,
        }
    }

    async fn close(&mut self) {
        self.kill.cancel();
        self.state.lock().client_closes += 1;
    }
}

fn reply_frame(id: u64, reply: &Reply) -> Value {
    match reply {
        Reply::Result(result) => json!({"id": id, "result": result}),
        Reply::Error { code, message } => {
            json!({"id": id, "error": {"code": code, "message": message}})
        }
    }
}

/// Test-side handle: script replies, inject traffic, inspect what was sent.
#[derive(Clone)]
pub struct FakeController {
    state: Arc<Mutex<FakeState>>,
}

impl FakeController {
    /// Make every subsequent connect fail with `err` (or succeed with `None`).
    pub fn refuse_connections(&self, err: Option<SyncError>) {
        self.state.lock().refuse = err;
    }

    /// Connect attempts so far, including refused ones.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Credentials presented on each connect attempt.
    pub fn credentials(&self) -> Vec<String> {
        self.state.lock().credentials.clone()
    }

    /// Whether a link is currently open.
    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .link
            .as_ref()
            .is_some_and(|l| !l.kill.is_cancelled())
    }

    /// Times the client closed a link itself.
    pub fn client_closes(&self) -> usize {
        self.state.lock().client_closes
    }

    /// Answer every request named `name` with `reply`.
    pub fn reply_to(&self, name: &str, reply: Reply) {
        let _ = self.state.lock().replies.insert(name.to_string(), reply);
    }

    /// Answer every request named `name` with `result`.
    pub fn respond_with(&self, name: &str, result: Value) {
        self.reply_to(name, Reply::Result(result));
    }

    /// Stop answering `name`.
    pub fn clear_reply(&self, name: &str) {
        let _ = self.state.lock().replies.remove(name);
    }

    /// Push a raw frame to the client.
    pub fn inject(&self, frame: Value) {
        if let Some(link) = &self.state.lock().link {
            let _ = link.inbound.send(frame.to_string());
        }
    }

    /// Push a raw text frame, valid JSON or not.
    pub fn inject_text(&self, text: &str) {
        if let Some(link) = &self.state.lock().link {
            let _ = link.inbound.send(text.to_string());
        }
    }

    /// Push a success response for request `id`.
    pub fn inject_response(&self, id: u64, result: Value) {
        self.inject(json!({"id": id, "result": result}));
    }

    /// Push an error response for request `id`.
    pub fn inject_error(&self, id: u64, code: &str, message: &str) {
        self.inject(json!({"id": id, "error": {"code": code, "message": message}}));
    }

    /// Push an event.
    pub fn inject_event(&self, event_type: &str, entity_id: &str, payload: Value, timestamp: i64) {
        self.inject(json!({
            "type": event_type,
            "entityId": entity_id,
            "payload": payload,
            "timestamp": timestamp,
        }));
    }

    /// Drop the current link from the server side.
    pub fn drop_connection(&self) {
        if let Some(link) = self.state.lock().link.take() {
            link.kill.cancel();
        }
    }

    /// Every frame the client sent, in order.
    pub fn sent(&self) -> Vec<Value> {
        self.state.lock().sent.clone()
    }

    /// Take and clear the sent frames.
    pub fn take_sent(&self) -> Vec<Value> {
        std::mem::take(&mut self.state.lock().sent)
    }

    /// Sent request frames named `name`.
    pub fn requests_named(&self, name: &str) -> Vec<Value> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|f| f.get("name").and_then(Value::as_str) == Some(name))
            .cloned()
            .collect()
    }

    /// Correlation id of the most recent request named `name`.
    pub fn last_request_id(&self, name: &str) -> Option<u64> {
        self.requests_named(name)
            .last()
            .and_then(|f| f.get("id").and_then(Value::as_u64))
    }
}
