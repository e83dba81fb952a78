//! Typed outgoing actions.
//!
//! Each action is a [`ProbeChain`]: the current request name first, then the
//! names older backend deployments answer to. The primary candidate gets the
//! full request timeout; legacy aliases get the shorter probe timeout.

use std::time::Duration;

use roomdesk_core::{EntityId, Result, SyncError};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::client::RealtimeClient;
use crate::probe::ProbeChain;

/// Request names in preference order.
pub mod request_names {
    /// Warms server-side session context after connect.
    pub const HANDSHAKE: &[&str] = &["session:init", "init"];
    /// Full (or single-entity) authoritative snapshot.
    pub const SNAPSHOT: &[&str] = &["rooms:list", "getRooms", "rooms:snapshot"];
    /// Activate a room.
    pub const ACTIVATE: &[&str] = &["room:activate", "activateRoom"];
    /// Deactivate a room now.
    pub const DEACTIVATE: &[&str] = &["room:deactivate", "deactivateRoom"];
    /// Deactivate a room at a later time.
    pub const SCHEDULE_DEACTIVATION: &[&str] =
        &["room:scheduleDeactivation", "scheduleRoomDeactivation"];
    /// Read one room's status.
    pub const GET_STATUS: &[&str] = &["room:getStatus", "getRoomStatus", "rooms:status"];
    /// Ask the server to re-broadcast current state.
    pub const RESYNC: &[&str] = &["rooms:resync", "resync"];
}

/// Build a chain whose first name uses `primary` and the rest use `alias`.
pub fn chain_of(names: &[&str], primary: Duration, alias: Duration) -> ProbeChain {
    let mut rest = names.iter();
    let mut chain = ProbeChain::new(rest.next().copied(), primary);
    for name in rest {
        chain = chain.then(*name, alias);
    }
    chain
}

/// Validated answer to an action request.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionAck {
    /// Whether the backend carried out the action.
    pub success: bool,
    /// Backend message, if any.
    pub message: Option<String>,
    /// Remaining response fields (or the `data` object when present).
    pub data: Value,
}

impl ActionAck {
    /// Validate a raw response.
    ///
    /// The response must be an object with a boolean `success`.
    pub fn from_response(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(SyncError::Validation(
                "acknowledgement must be an object".to_string(),
            ));
        };
        let success = match map.remove("success") {
            Some(Value::Bool(success)) => success,
            Some(_) => {
                return Err(SyncError::Validation(
                    "acknowledgement `success` must be a boolean".to_string(),
                ));
            }
            None => {
                return Err(SyncError::Validation(
                    "acknowledgement has no `success` field".to_string(),
                ));
            }
        };
        let message = match map.remove("message") {
            Some(Value::String(message)) => Some(message),
            _ => None,
        };
        let data = map.remove("data").unwrap_or(Value::Object(map));
        Ok(Self {
            success,
            message,
            data,
        })
    }

    /// `status` reported in the data, if any.
    pub fn status(&self) -> Option<&str> {
        self.data.get("status").and_then(Value::as_str)
    }

    fn into_result(self, action: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(SyncError::Remote {
                code: "REJECTED".to_string(),
                message: self
                    .message
                    .unwrap_or_else(|| format!("{action} was rejected")),
            })
        }
    }
}

/// Options for [`RoomActions::deactivate`].
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateOptions {
    /// Close the room even if a game is running.
    pub force: bool,
    /// Tell connected players before closing.
    pub notify_players: bool,
    /// Free-form reason recorded by the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Room management requests over the realtime connection.
///
/// Failures are surfaced, never retried here; every action is safe for the
/// caller to retry.
#[derive(Clone)]
pub struct RoomActions {
    client: RealtimeClient,
    activate: ProbeChain,
    deactivate: ProbeChain,
    schedule_deactivation: ProbeChain,
    get_status: ProbeChain,
    resync: ProbeChain,
}

impl RoomActions {
    /// Actions issued through `client`, with its configured timeouts.
    pub fn new(client: RealtimeClient) -> Self {
        let primary = client.config().request_timeout;
        let alias = client.config().probe_timeout;
        Self {
            activate: chain_of(request_names::ACTIVATE, primary, alias),
            deactivate: chain_of(request_names::DEACTIVATE, primary, alias),
            schedule_deactivation: chain_of(request_names::SCHEDULE_DEACTIVATION, primary, alias),
            get_status: chain_of(request_names::GET_STATUS, primary, alias),
            resync: chain_of(request_names::RESYNC, primary, alias),
            client,
        }
    }

    /// Activate a room.
    pub async fn activate(&self, entity_id: &EntityId, reason: Option<&str>) -> Result<ActionAck> {
        let mut payload = entity_payload(entity_id);
        if let Some(reason) = reason {
            let _ = payload.insert("reason".into(), json!(reason));
        }
        self.run("activate", &self.activate, Value::Object(payload)).await
    }

    /// Deactivate a room now.
    pub async fn deactivate(
        &self,
        entity_id: &EntityId,
        options: &DeactivateOptions,
    ) -> Result<ActionAck> {
        let mut payload = entity_payload(entity_id);
        let _ = payload.insert(
            "options".into(),
            serde_json::to_value(options)
                .map_err(|e| SyncError::Validation(format!("deactivate options: {e}")))?,
        );
        self.run("deactivate", &self.deactivate, Value::Object(payload))
            .await
    }

    /// Deactivate a room at `at_ms` (epoch ms).
    pub async fn schedule_deactivation(
        &self,
        entity_id: &EntityId,
        at_ms: i64,
        reason: Option<&str>,
    ) -> Result<ActionAck> {
        let mut payload = entity_payload(entity_id);
        let _ = payload.insert("at".into(), json!(at_ms));
        if let Some(reason) = reason {
            let _ = payload.insert("reason".into(), json!(reason));
        }
        self.run(
            "schedule_deactivation",
            &self.schedule_deactivation,
            Value::Object(payload),
        )
        .await
    }

    /// Read a room's status.
    pub async fn get_status(&self, entity_id: &EntityId) -> Result<ActionAck> {
        self.run(
            "get_status",
            &self.get_status,
            Value::Object(entity_payload(entity_id)),
        )
        .await
    }

    /// Ask the server to re-broadcast current state.
    pub async fn resync(&self) -> Result<ActionAck> {
        self.run("resync", &self.resync, json!({})).await
    }

    #[tracing::instrument(skip_all, fields(action = %action))]
    async fn run(&self, action: &str, chain: &ProbeChain, payload: Value) -> Result<ActionAck> {
        let ack = self
            .client
            .probe(chain, &payload, ActionAck::from_response)
            .await?;
        debug!(action, success = ack.success, "action acknowledged");
        ack.into_result(action)
    }
}

fn entity_payload(entity_id: &EntityId) -> Map<String, Value> {
    let mut payload = Map::new();
    let _ = payload.insert("entityId".into(), json!(entity_id));
    payload
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use roomdesk_core::credential::StaticCredential;

    use super::*;
    use crate::client::ClientConfig;
    use crate::testing::{self, FakeController, Reply};

    #[test]
    fn ack_requires_success_flag() {
        let err = ActionAck::from_response(json!({"status": "active"})).unwrap_err();
        assert_matches!(err, SyncError::Validation(_));
        let err = ActionAck::from_response(json!("ok")).unwrap_err();
        assert_matches!(err, SyncError::Validation(_));
    }

    #[test]
    fn ack_prefers_data_object() {
        let ack = ActionAck::from_response(json!({
            "success": true,
            "message": "done",
            "data": {"status": "inactive"},
        }))
        .unwrap();
        assert!(ack.success);
        assert_eq!(ack.message.as_deref(), Some("done"));
        assert_eq!(ack.status(), Some("inactive"));
    }

    #[test]
    fn ack_without_data_keeps_remaining_fields() {
        let ack = ActionAck::from_response(json!({"success": true, "status": "active"})).unwrap();
        assert_eq!(ack.data, json!({"status": "active"}));
    }

    #[test]
    fn chain_timeouts_split_primary_and_aliases() {
        let chain = chain_of(
            request_names::GET_STATUS,
            Duration::from_secs(10),
            Duration::from_secs(3),
        );
        let timeouts: Vec<_> = chain.candidates().iter().map(|c| c.timeout).collect();
        assert_eq!(
            timeouts,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(3),
                Duration::from_secs(3)
            ]
        );
        assert_eq!(chain.primary(), Some("room:getStatus"));
    }

    async fn connected() -> (RoomActions, FakeController) {
        let (connector, controller) = testing::fake();
        let client = RealtimeClient::new(
            ClientConfig::default(),
            Arc::new(connector),
            Arc::new(StaticCredential("tok".into())),
        );
        client.connect().await.unwrap();
        (RoomActions::new(client), controller)
    }

    #[tokio::test(start_paused = true)]
    async fn activate_sends_entity_and_reason() {
        let (actions, controller) = connected().await;
        controller.respond_with("room:activate", json!({"success": true}));

        let ack = actions
            .activate(&EntityId::from("room1"), Some("event night"))
            .await
            .unwrap();
        assert!(ack.success);

        let sent = controller.requests_named("room:activate");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["payload"]["entityId"], "room1");
        assert_eq!(sent[0]["payload"]["reason"], "event night");
    }

    #[tokio::test(start_paused = true)]
    async fn get_status_falls_back_to_legacy_name() {
        let (actions, controller) = connected().await;
        controller.reply_to(
            "room:getStatus",
            Reply::Error {
                code: "UNKNOWN_EVENT".into(),
                message: "no handler".into(),
            },
        );
        controller.respond_with(
            "getRoomStatus",
            json!({"success": true, "data": {"status": "archived"}}),
        );

        let ack = actions.get_status(&EntityId::from("room1")).await.unwrap();
        assert_eq!(ack.status(), Some("archived"));
        assert!(controller.requests_named("rooms:status").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_action_surfaces_remote_error() {
        let (actions, controller) = connected().await;
        controller.respond_with(
            "room:deactivate",
            json!({"success": false, "message": "game in progress"}),
        );

        let err = actions
            .deactivate(&EntityId::from("room1"), &DeactivateOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::Remote { message, .. } if message == "game in progress");
        // a well-formed refusal ends the chain
        assert!(controller.requests_named("deactivateRoom").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_deactivation_payload() {
        let (actions, controller) = connected().await;
        controller.respond_with("room:scheduleDeactivation", json!({"success": true}));

        let _ = actions
            .schedule_deactivation(&EntityId::from("room9"), 1_700_000_000_000, None)
            .await
            .unwrap();
        let sent = controller.requests_named("room:scheduleDeactivation");
        assert_eq!(sent[0]["payload"]["at"], 1_700_000_000_000_i64);
        assert!(sent[0]["payload"].get("reason").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_action_exhausts_chain() {
        let (actions, _controller) = connected().await;
        let err = actions.resync().await.unwrap_err();
        assert_matches!(err, SyncError::ProbeExhausted { attempted } if attempted == vec!["rooms:resync", "resync"]);
    }
}
