//! # roomdesk-core
//!
//! Shared vocabulary for the roomdesk realtime session and synchronization core.
//!
//! - **Errors**: [`SyncError`] taxonomy (transport, timeout, auth, validation)
//! - **IDs**: [`EntityId`] newtype for externally-visible resources
//! - **Clock**: [`Clock`] abstraction so wall-clock math is testable
//! - **Pub-sub**: [`Subscribers`] fan-out with RAII [`Subscription`] handles
//! - **Credentials**: [`CredentialProvider`] seam between auth and transport
//! - **Logging**: `tracing` subscriber setup and test capture helpers

#![deny(unsafe_code)]

pub mod clock;
pub mod credential;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod pubsub;

pub use clock::{Clock, FixedClock, PausedClock, SystemClock};
pub use credential::CredentialProvider;
pub use errors::{ErrorKind, Result, SyncError};
pub use ids::EntityId;
pub use pubsub::{Subscribers, Subscription};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
