//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON file only needs the keys it overrides.

mod auth;
mod realtime;
mod sync;

pub use auth::*;
pub use realtime::*;
pub use sync::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "realtime": { "url": "wss://rooms.example.com/realtime" },
///   "sync": { "pollIntervalMs": 60000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomdeskSettings {
    /// Token lifecycle settings.
    pub auth: AuthSettings,
    /// Realtime transport settings.
    pub realtime: RealtimeSettings,
    /// Reconciler settings.
    pub sync: SyncSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl RoomdeskSettings {
    /// How long realtime data stays authoritative after its last update.
    ///
    /// Realtime is stale after `stalenessFactor` keep-alive intervals.
    pub fn staleness_window_ms(&self) -> u64 {
        self.realtime
            .keepalive_interval_ms
            .saturating_mul(u64::from(self.sync.staleness_factor))
    }

    /// Reject values that would stall timers or disable bounded structures.
    pub fn validate(&self) -> Result<()> {
        let zero_checks = [
            ("auth.maxRefreshAttempts", u64::from(self.auth.max_refresh_attempts)),
            ("auth.refreshTimeoutMs", self.auth.refresh_timeout_ms),
            ("realtime.requestTimeoutMs", self.realtime.request_timeout_ms),
            ("realtime.probeTimeoutMs", self.realtime.probe_timeout_ms),
            ("realtime.connectTimeoutMs", self.realtime.connect_timeout_ms),
            ("realtime.dedupCapacity", self.realtime.dedup_capacity as u64),
            ("realtime.dedupBucketMs", self.realtime.dedup_bucket_ms),
            ("realtime.keepaliveIntervalMs", self.realtime.keepalive_interval_ms),
            ("sync.pollIntervalMs", self.sync.poll_interval_ms),
        ];
        for (name, value) in zero_checks {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{name} must be > 0")));
            }
        }
        if self.realtime.reconnect_base_delay_ms > self.realtime.reconnect_max_delay_ms {
            return Err(SettingsError::InvalidValue(
                "realtime.reconnectBaseDelayMs exceeds reconnectMaxDelayMs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
