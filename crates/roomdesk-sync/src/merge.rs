//! The merge rule.
//!
//! - **Snapshot**: configuration is replaced outright. Live fields are
//!   replaced too unless realtime updated them within the staleness window,
//!   in which case realtime-sourced fields are kept and only the rest are
//!   refreshed.
//! - **Realtime**: live fields are overwritten, except that a terminal
//!   entity ignores its status and non-terminal-only fields.
//!
//! Derived fields are recomputed from scratch after either branch.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::derived;
use crate::entity::{EntitySnapshot, Provenance};
use crate::schema::FieldSchema;

/// Which source an incoming update came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// Authoritative poll.
    Snapshot,
    /// Realtime event.
    Realtime,
}

/// Inputs to one merge that don't come from the entity itself.
#[derive(Clone, Copy, Debug)]
pub struct MergeContext<'a> {
    /// Field classification.
    pub schema: &'a FieldSchema,
    /// Current wall-clock time, epoch ms.
    pub now_ms: i64,
    /// Realtime data older than this no longer outranks a poll.
    pub staleness_window_ms: i64,
    /// Whether the realtime link is currently up.
    pub realtime_available: bool,
    /// Currency for formatted fields.
    pub currency: &'a str,
}

/// What a merge ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Incoming fields that were dropped.
    pub dropped: Vec<String>,
}

const ID_KEYS: [&str; 2] = ["id", "entityId"];

/// Fold `incoming` into `entity`.
pub fn merge_rule(
    entity: &mut EntitySnapshot,
    incoming: &Map<String, Value>,
    source: Source,
    ctx: &MergeContext<'_>,
) -> MergeReport {
    let report = match source {
        Source::Snapshot => {
            merge_snapshot(entity, incoming, ctx);
            MergeReport::default()
        }
        Source::Realtime => merge_realtime(entity, incoming, ctx),
    };
    derived::recompute(entity, ctx.currency);
    report
}

fn is_terminal(entity: &EntitySnapshot, schema: &FieldSchema) -> bool {
    entity
        .authoritative_status
        .as_deref()
        .is_some_and(|status| schema.is_terminal(status))
}

fn merge_snapshot(entity: &mut EntitySnapshot, incoming: &Map<String, Value>, ctx: &MergeContext<'_>) {
    let schema = ctx.schema;
    let mut config = Map::new();
    let mut poll_live = Map::new();
    for (field, value) in incoming {
        if ID_KEYS.contains(&field.as_str()) {
            continue;
        }
        let target = if schema.is_live(field) {
            &mut poll_live
        } else {
            &mut config
        };
        let _ = target.insert(field.clone(), value.clone());
    }

    entity.config_fields = config;
    entity.authoritative_status = incoming
        .get(&schema.status_field)
        .and_then(Value::as_str)
        .map(str::to_owned);
    let terminal = is_terminal(entity, schema);
    if terminal {
        for (field, pin) in &schema.terminal_pins {
            let _ = poll_live.insert(field.clone(), pin.clone());
        }
    }

    let realtime_fresh = ctx.realtime_available
        && entity
            .last_realtime_at
            .is_some_and(|at| ctx.now_ms - at < ctx.staleness_window_ms);

    let mut live = poll_live.clone();
    let mut provenance = live
        .keys()
        .map(|field| (field.clone(), Provenance::Snapshot))
        .collect::<BTreeMap<_, _>>();
    if realtime_fresh {
        for (field, source) in &entity.provenance {
            if *source != Provenance::Realtime || (terminal && schema.frozen_when_terminal(field)) {
                continue;
            }
            if let Some(value) = entity.live_fields.get(field) {
                let _ = live.insert(field.clone(), value.clone());
                let _ = provenance.insert(field.clone(), Provenance::Realtime);
            }
        }
    }

    entity.live_fields = live;
    entity.provenance = provenance;
    entity.last_poll_live = poll_live;
    entity.last_snapshot_at = Some(ctx.now_ms);
}

fn merge_realtime(
    entity: &mut EntitySnapshot,
    incoming: &Map<String, Value>,
    ctx: &MergeContext<'_>,
) -> MergeReport {
    let schema = ctx.schema;
    let terminal = is_terminal(entity, schema);
    let mut report = MergeReport::default();
    let mut applied = false;

    for (field, value) in incoming {
        if ID_KEYS.contains(&field.as_str()) {
            continue;
        }
        if !schema.is_live(field) || (terminal && schema.frozen_when_terminal(field)) {
            report.dropped.push(field.clone());
            continue;
        }
        let _ = entity.live_fields.insert(field.clone(), value.clone());
        let _ = entity.provenance.insert(field.clone(), Provenance::Realtime);
        applied = true;
    }

    if applied {
        entity.last_realtime_at = Some(ctx.now_ms);
    }
    if !report.dropped.is_empty() {
        if terminal {
            debug!(
                entity_id = %entity.id,
                fields = ?report.dropped,
                "ignoring realtime fields for terminal entity"
            );
        } else {
            debug!(
                entity_id = %entity.id,
                fields = ?report.dropped,
                "ignoring non-live realtime fields"
            );
        }
    }
    report
}

/// Put every live field back to its latest polled value.
pub fn revert_to_poll(entity: &mut EntitySnapshot, currency: &str) {
    entity.live_fields = entity.last_poll_live.clone();
    entity.provenance = entity
        .live_fields
        .keys()
        .map(|field| (field.clone(), Provenance::Snapshot))
        .collect();
    entity.last_realtime_at = None;
    derived::recompute(entity, currency);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
