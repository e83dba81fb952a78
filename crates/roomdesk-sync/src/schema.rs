//! Which fields are live, which only make sense for a non-terminal entity,
//! and what they are pinned to once the entity is terminal.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

/// Field classification for one entity kind.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchema {
    /// Field carrying the entity status.
    pub status_field: String,
    /// Fields that realtime events may update. Everything else in a
    /// snapshot item (other than the id) is configuration.
    pub live_fields: BTreeSet<String>,
    /// Live fields meaningless once the entity is terminal.
    pub non_terminal_only: BTreeSet<String>,
    /// Status values that make an entity terminal.
    pub terminal_statuses: BTreeSet<String>,
    /// Values non-terminal-only fields take while terminal.
    pub terminal_pins: Map<String, Value>,
}

impl FieldSchema {
    /// Schema for game rooms.
    pub fn rooms() -> Self {
        let set = |names: &[&str]| names.iter().map(|s| (*s).to_string()).collect();
        let mut terminal_pins = Map::new();
        let _ = terminal_pins.insert("game_status".into(), json!("ended"));
        let _ = terminal_pins.insert("cards_remaining".into(), json!(0));
        let _ = terminal_pins.insert("cards_dealt".into(), json!(0));
        Self {
            status_field: "status".to_string(),
            live_fields: set(&[
                "status",
                "game_status",
                "player_count",
                "max_players",
                "cards_remaining",
                "cards_dealt",
                "pot",
                "started_at",
                "last_activity_at",
            ]),
            non_terminal_only: set(&["game_status", "cards_remaining", "cards_dealt"]),
            terminal_statuses: set(&["archive", "archived", "deleted"]),
            terminal_pins,
        }
    }

    /// Whether realtime may update `field`.
    pub fn is_live(&self, field: &str) -> bool {
        self.live_fields.contains(field)
    }

    /// Whether `status` is terminal.
    pub fn is_terminal(&self, status: &str) -> bool {
        self.terminal_statuses.contains(status)
    }

    /// Whether realtime updates to `field` are ignored on a terminal entity.
    pub fn frozen_when_terminal(&self, field: &str) -> bool {
        field == self.status_field || self.non_terminal_only.contains(field)
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::rooms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooms_schema_classification() {
        let schema = FieldSchema::rooms();
        assert!(schema.is_live("player_count"));
        assert!(!schema.is_live("name"));
        assert!(schema.is_terminal("archive"));
        assert!(!schema.is_terminal("active"));
        assert!(schema.frozen_when_terminal("status"));
        assert!(schema.frozen_when_terminal("game_status"));
        assert!(!schema.frozen_when_terminal("player_count"));
    }

    #[test]
    fn every_pin_is_non_terminal_only() {
        let schema = FieldSchema::rooms();
        for field in schema.terminal_pins.keys() {
            assert!(schema.non_terminal_only.contains(field), "{field}");
        }
    }
}
