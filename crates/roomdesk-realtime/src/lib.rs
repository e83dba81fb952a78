//! # roomdesk-realtime
//!
//! Persistent duplex connection to the backend event stream.
//!
//! - **Client**: [`RealtimeClient`] with connect/reconnect, bounded backoff,
//!   request correlation, keep-alive, and per-type event handlers
//! - **Protocol**: JSON text frames for requests, responses, events
//! - **Dedup**: [`DedupWindow`] drops repeated event deliveries
//! - **Probing**: [`ProbeChain`] tries request-name aliases in order
//! - **Actions**: [`RoomActions`] typed room management requests
//! - **Transport**: [`Connector`]/[`Transport`] seam with a WebSocket
//!   implementation and an in-memory fake in [`testing`]

#![deny(unsafe_code)]

pub mod actions;
pub mod backoff;
pub mod client;
pub mod dedup;
pub mod probe;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use actions::{ActionAck, DeactivateOptions, RoomActions};
pub use client::{ClientConfig, ConnectionState, RealtimeClient};
pub use dedup::DedupWindow;
pub use probe::{ProbeChain, RequestCandidate, Requester};
pub use protocol::{Event, event_types};
pub use transport::{Connector, Transport, WebSocketConnector};
