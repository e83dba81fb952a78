//! # roomdesk-sync
//!
//! Per-entity view reconciled from two sources:
//!
//! - **Poll**: authoritative snapshots from a [`SnapshotFetcher`], either
//!   over the realtime link or a REST endpoint
//! - **Realtime**: deltas from an attached `RealtimeClient`
//!
//! [`merge_rule`] decides which source wins per field, [`FieldSchema`]
//! says which fields are live, and [`derived`] recomputes display values
//! after every merge.

#![deny(unsafe_code)]

pub mod derived;
pub mod entity;
pub mod fetcher;
pub mod merge;
pub mod reconciler;
pub mod schema;

pub use entity::{EntitySnapshot, Provenance};
pub use fetcher::{HttpSnapshotFetcher, PollScope, RealtimeSnapshotFetcher, SnapshotFetcher};
pub use merge::{MergeContext, MergeReport, Source, merge_rule, revert_to_poll};
pub use reconciler::{EntityUpdate, Reconciler, ReconcilerConfig};
pub use schema::FieldSchema;
