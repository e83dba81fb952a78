//! Wire protocol.
//!
//! Outbound requests are `{"id", "name", "payload"}` text frames. Inbound
//! frames are one of:
//!
//! - a response `{"id", "result"?, "error"?: {"code", "message"}}`
//! - an event `{"type", "entityId", "payload", "timestamp"}`
//! - a control frame `{"kind"}` (e.g. `pong`)

use roomdesk_core::{EntityId, Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound event type tags.
pub mod event_types {
    /// An entity's status changed.
    pub const STATUS_CHANGED: &str = "status-changed";
    /// An entity was activated.
    pub const ACTIVATED: &str = "activated";
    /// An entity was deactivated.
    pub const DEACTIVATED: &str = "deactivated";
    /// An entity was archived.
    pub const ARCHIVED: &str = "archived";
    /// The entity list changed (created or removed entities).
    pub const LIST_UPDATED: &str = "list-updated";
    /// Live metrics for an entity changed.
    pub const METRIC_UPDATED: &str = "metric-updated";

    /// Every tag above.
    pub const ALL: [&str; 6] = [
        STATUS_CHANGED,
        ACTIVATED,
        DEACTIVATED,
        ARCHIVED,
        LIST_UPDATED,
        METRIC_UPDATED,
    ];
}

#[derive(Serialize)]
struct OutboundRequest<'a> {
    id: u64,
    name: &'a str,
    payload: &'a Value,
}

/// Encode a request frame.
pub fn encode_request(id: u64, name: &str, payload: &Value) -> Result<String> {
    serde_json::to_string(&OutboundRequest { id, name, payload })
        .map_err(|e| SyncError::Validation(format!("encode request {name}: {e}")))
}

/// The keep-alive frame.
pub fn ping_frame() -> String {
    r#"{"kind":"ping"}"#.to_string()
}

/// An inbound realtime event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event tag (see [`event_types`]).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Entity the event concerns.
    pub entity_id: EntityId,
    /// Event body.
    #[serde(default)]
    pub payload: Value,
    /// Server timestamp, epoch ms.
    pub timestamp: i64,
}

/// Error body of a failed response.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteError {
    /// Backend error code (string or number on the wire).
    #[serde(default, deserialize_with = "code_as_string")]
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl RemoteError {
    /// Whether the backend refused the credential.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self.code.to_ascii_uppercase().as_str(),
            "401" | "403" | "UNAUTHORIZED" | "FORBIDDEN" | "AUTH_FAILED" | "TOKEN_EXPIRED"
        )
    }
}

fn code_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Response to a correlated request.
#[derive(Clone, Debug, Deserialize)]
pub struct Response {
    /// Correlation id of the request.
    pub id: u64,
    /// Result body on success.
    #[serde(default)]
    pub result: Value,
    /// Error body on failure.
    pub error: Option<RemoteError>,
}

impl Response {
    /// Convert into the request outcome.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) if err.is_auth_rejection() => Err(SyncError::Auth(format!(
                "{}: {}",
                err.code, err.message
            ))),
            Some(err) => Err(SyncError::Remote {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result),
        }
    }
}

/// Connection-level control frame.
#[derive(Clone, Debug, Deserialize)]
pub struct Control {
    /// Frame kind, e.g. `pong`.
    pub kind: String,
}

/// Any inbound frame.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    /// Response to a request.
    Response(Response),
    /// Realtime event.
    Event(Event),
    /// Keep-alive or other control traffic.
    Control(Control),
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<Inbound> {
    serde_json::from_str(text).map_err(|e| SyncError::Validation(format!("malformed frame: {e}")))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Value>),
    One(Value),
}

#[derive(Deserialize)]
struct SnapshotEnvelope {
    #[serde(default)]
    success: bool,
    items: Option<OneOrMany>,
    message: Option<String>,
}

/// Validate a `{success, items}` snapshot response and return its items.
///
/// `items` may be a list or a single object.
pub fn parse_snapshot(value: Value) -> Result<Vec<Value>> {
    let envelope: SnapshotEnvelope = serde_json::from_value(value)
        .map_err(|e| SyncError::Validation(format!("snapshot response: {e}")))?;
    if !envelope.success {
        return Err(SyncError::Validation(
            envelope
                .message
                .unwrap_or_else(|| "snapshot reported failure".to_string()),
        ));
    }
    match envelope.items {
        Some(OneOrMany::Many(items)) => Ok(items),
        Some(OneOrMany::One(item)) if item.is_object() => Ok(vec![item]),
        Some(OneOrMany::One(_)) => Err(SyncError::Validation(
            "snapshot items must be an object or a list".to_string(),
        )),
        None => Err(SyncError::Validation("snapshot response has no items".to_string())),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
