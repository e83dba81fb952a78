//! # roomdesk-settings
//!
//! Configuration for the roomdesk sync core, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`RoomdeskSettings::default()`]
//! 2. **User file**: `~/.roomdesk/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ROOMDESK_*` overrides (highest priority)
//!
//! There is no process-wide instance: the caller loads settings once and
//! hands them to whatever it builds.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
