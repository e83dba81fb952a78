//! Reconciler settings.

use serde::{Deserialize, Serialize};

/// Poll cadence and presentation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Authoritative poll interval.
    pub poll_interval_ms: u64,
    /// Realtime data is stale after this many keep-alive intervals.
    pub staleness_factor: u32,
    /// REST endpoint for snapshots; when unset, snapshots go over realtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,
    /// ISO 4217 code used for formatted currency fields.
    pub currency: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 300_000,
            staleness_factor: 2,
            snapshot_url: None,
            currency: "USD".to_string(),
        }
    }
}
