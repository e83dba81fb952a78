//! # roomdesk
//!
//! Client-side realtime session and sync core.
//!
//! [`SyncCore`] is the single composition root: it owns the token
//! lifecycle manager, the realtime transport client and the
//! synchronization reconciler, and reduces their combined state to a
//! [`SurfaceState`] the consumer UI can show.
//!
//! The component crates are re-exported for consumers that need more than
//! the composition root.

#![deny(unsafe_code)]

pub mod surface;
pub mod sync_core;

pub use surface::SurfaceState;
pub use sync_core::{SyncCore, SyncCoreBuilder, login_error_message};

pub use roomdesk_auth as auth;
pub use roomdesk_realtime as realtime;
pub use roomdesk_settings as settings;
pub use roomdesk_sync as sync;
