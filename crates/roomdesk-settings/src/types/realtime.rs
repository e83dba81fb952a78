//! Realtime transport settings.

use serde::{Deserialize, Serialize};

/// Connection, correlation, and dedup settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// WebSocket endpoint.
    pub url: String,
    /// Automatic reconnect attempts before the connection goes terminal.
    pub max_reconnect_attempts: u32,
    /// First reconnect delay.
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay ceiling.
    pub reconnect_max_delay_ms: u64,
    /// Deadline for opening the socket.
    pub connect_timeout_ms: u64,
    /// Default per-request deadline.
    pub request_timeout_ms: u64,
    /// Per-candidate deadline when probing alternative request names.
    pub probe_timeout_ms: u64,
    /// Recently-seen event keys retained for dedup.
    pub dedup_capacity: usize,
    /// Event timestamps are bucketed to this width before keying.
    pub dedup_bucket_ms: u64,
    /// Ping interval; silence for twice this long drops the link.
    pub keepalive_interval_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000/realtime".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            probe_timeout_ms: 3_000,
            dedup_capacity: 100,
            dedup_bucket_ms: 1_000,
            keepalive_interval_ms: 25_000,
        }
    }
}
