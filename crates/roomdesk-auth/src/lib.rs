//! # roomdesk-auth
//!
//! Token lifecycle for the roomdesk sync core.
//!
//! - [`TokenManager`]: session state, proactive renewal, single-flight
//!   refresh, logout countdown
//! - [`RenewalClient`] / [`HttpRenewalClient`]: the renewal endpoint
//! - [`ExpirySource`] / [`HttpExpirySource`]: out-of-band expiry metadata

#![deny(unsafe_code)]

pub mod errors;
pub mod expiry;
pub mod manager;
pub mod renewal;
pub mod types;

pub use errors::AuthError;
pub use expiry::{ExpirySource, HttpExpirySource, StaticExpirySource, parse_expiry_meta};
pub use manager::{RefreshOutcome, TokenManager};
pub use renewal::{HttpRenewalClient, RenewalClient};
pub use types::{Credential, Renewal, SessionStatus, StatusChange, TokenConfig};
