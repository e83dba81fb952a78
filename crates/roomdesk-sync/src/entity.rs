//! Merged per-entity view.

use std::collections::BTreeMap;

use roomdesk_core::EntityId;
use serde::Serialize;
use serde_json::{Map, Value};

/// Where a live field's current value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// The authoritative poll.
    Snapshot,
    /// A realtime event.
    Realtime,
}

/// Merged view of one externally-visible resource.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    /// Entity id.
    pub id: EntityId,
    /// Sourced only from the authoritative poll.
    pub config_fields: Map<String, Value>,
    /// Sourced from realtime when fresh, else from the poll.
    pub live_fields: Map<String, Value>,
    /// Per live field source.
    pub provenance: BTreeMap<String, Provenance>,
    /// Recomputed after every merge; never merged field-by-field.
    pub derived: Map<String, Value>,
    /// Status reported by the latest poll.
    pub authoritative_status: Option<String>,
    /// When the latest poll was merged (epoch ms).
    pub last_snapshot_at: Option<i64>,
    /// When the latest realtime update was merged (epoch ms).
    pub last_realtime_at: Option<i64>,
    /// Live values as of the latest poll, terminal pins applied.
    #[serde(skip)]
    pub(crate) last_poll_live: Map<String, Value>,
}

impl EntitySnapshot {
    /// Empty snapshot for `id`.
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            config_fields: Map::new(),
            live_fields: Map::new(),
            provenance: BTreeMap::new(),
            derived: Map::new(),
            authoritative_status: None,
            last_snapshot_at: None,
            last_realtime_at: None,
            last_poll_live: Map::new(),
        }
    }

    /// Freshest value of a raw field, live first.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.live_fields
            .get(name)
            .or_else(|| self.config_fields.get(name))
    }

    /// Live values as of the latest successful poll.
    pub fn last_poll_live(&self) -> &Map<String, Value> {
        &self.last_poll_live
    }

    /// Latest merge time from either source.
    pub fn updated_at(&self) -> Option<i64> {
        self.last_snapshot_at.max(self.last_realtime_at)
    }

    /// Whether two snapshots show the same data to a consumer.
    ///
    /// Merge timestamps are ignored.
    pub fn same_view(&self, other: &Self) -> bool {
        self.config_fields == other.config_fields
            && self.live_fields == other.live_fields
            && self.provenance == other.provenance
            && self.derived == other.derived
            && self.authoritative_status == other.authoritative_status
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn field_prefers_live() {
        let mut snap = EntitySnapshot::new(EntityId::from("room1"));
        let _ = snap.config_fields.insert("name".into(), json!("Lobby"));
        let _ = snap.config_fields.insert("max_players".into(), json!(8));
        let _ = snap.live_fields.insert("max_players".into(), json!(10));
        assert_eq!(snap.field("name"), Some(&json!("Lobby")));
        assert_eq!(snap.field("max_players"), Some(&json!(10)));
        assert_eq!(snap.field("missing"), None);
    }

    #[test]
    fn same_view_ignores_timestamps() {
        let a = EntitySnapshot::new(EntityId::from("room1"));
        let mut b = a.clone();
        b.last_snapshot_at = Some(5);
        assert!(a.same_view(&b));
        let _ = b.live_fields.insert("pot".into(), json!(1));
        assert!(!a.same_view(&b));
    }

    #[test]
    fn serializes_camel_case_without_poll_cache() {
        let mut snap = EntitySnapshot::new(EntityId::from("room1"));
        let _ = snap.last_poll_live.insert("pot".into(), json!(1));
        let value = serde_json::to_value(&snap).unwrap();
        assert!(value.get("liveFields").is_some());
        assert!(value.get("lastPollLive").is_none());
    }
}
