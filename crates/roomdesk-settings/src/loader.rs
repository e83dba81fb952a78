//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::RoomdeskSettings;

/// Resolve the path to the settings file (`~/.roomdesk/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".roomdesk").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`RoomdeskSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<RoomdeskSettings> {
    let defaults = serde_json::to_value(RoomdeskSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RoomdeskSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ROOMDESK_*` environment variable overrides.
///
/// Integers must parse and fall within range; invalid values are logged and
/// ignored (the file/default value stands).
pub fn apply_env_overrides(settings: &mut RoomdeskSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup, so parsing is testable without
/// touching the process environment.
pub fn apply_overrides_from<F>(settings: &mut RoomdeskSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("ROOMDESK_WS_URL") {
        settings.realtime.url = v;
    }
    if let Some(v) = env.string("ROOMDESK_RENEWAL_URL") {
        settings.auth.renewal_url = v;
    }
    if let Some(v) = env.string("ROOMDESK_SNAPSHOT_URL") {
        settings.sync.snapshot_url = Some(v);
    }
    if let Some(v) = env.u32("ROOMDESK_MAX_RECONNECT_ATTEMPTS", 0, 100) {
        settings.realtime.max_reconnect_attempts = v;
    }
    if let Some(v) = env.u64("ROOMDESK_POLL_INTERVAL_MS", 1_000, 86_400_000) {
        settings.sync.poll_interval_ms = v;
    }
    if let Some(v) = env.u64("ROOMDESK_BUFFER_WINDOW_MS", 0, 3_600_000) {
        settings.auth.buffer_window_ms = v;
    }
    if let Some(v) = env.string("ROOMDESK_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = (self.lookup)(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;
    use crate::errors::SettingsError;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"realtime": {"url": "ws://a", "maxReconnectAttempts": 5}});
        let source = serde_json::json!({"realtime": {"url": "ws://b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["realtime"]["url"], "ws://b");
        assert_eq!(merged["realtime"]["maxReconnectAttempts"], 5);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.auth.buffer_window_ms, 60_000);
        assert_eq!(settings.realtime.max_reconnect_attempts, 5);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"sync": {"pollIntervalMs": 60000, "snapshotUrl": "https://api.example.com/rooms"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.sync.poll_interval_ms, 60_000);
        assert_eq!(
            settings.sync.snapshot_url.as_deref(),
            Some("https://api.example.com/rooms")
        );
        assert_eq!(settings.sync.staleness_factor, 2);
        assert_eq!(settings.auth.max_refresh_attempts, 3);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_zero_timeouts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"realtime": {"requestTimeoutMs": 0}}"#).unwrap();

        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = RoomdeskSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup(&[
                ("ROOMDESK_WS_URL", "wss://rooms.example.com/rt"),
                ("ROOMDESK_MAX_RECONNECT_ATTEMPTS", "8"),
                ("ROOMDESK_POLL_INTERVAL_MS", "120000"),
                ("ROOMDESK_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.realtime.url, "wss://rooms.example.com/rt");
        assert_eq!(settings.realtime.max_reconnect_attempts, 8);
        assert_eq!(settings.sync.poll_interval_ms, 120_000);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = RoomdeskSettings::default();
        apply_overrides_from(
            &mut settings,
            lookup(&[
                ("ROOMDESK_MAX_RECONNECT_ATTEMPTS", "lots"),
                ("ROOMDESK_POLL_INTERVAL_MS", "5"),
                ("ROOMDESK_WS_URL", ""),
            ]),
        );
        let defaults = RoomdeskSettings::default();
        assert_eq!(settings.realtime.max_reconnect_attempts, 5);
        assert_eq!(settings.sync.poll_interval_ms, 300_000);
        assert_eq!(settings.realtime.url, defaults.realtime.url);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("30000", 1000, 600_000), Some(30_000));
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("abc", 1000, 600_000), None);
        assert_eq!(parse_u32_range("100", 0, 100), Some(100));
        assert_eq!(parse_u32_range("101", 0, 100), None);
    }
}
