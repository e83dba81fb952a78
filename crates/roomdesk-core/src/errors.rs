//! Error taxonomy for the sync core.
//!
//! Every failure the core can surface falls into one of four kinds:
//!
//! - **Transport**: connection-level loss; recovered by reconnecting
//! - **Timeout**: a single request exceeded its deadline; connection unaffected
//! - **Auth**: credentials rejected or renewal exhausted; fatal, forces logout
//! - **Validation**: a response had the wrong shape; the request counts as failed
//!
//! [`SyncError`] is `Clone` because single-flight operations hand the same
//! outcome to every waiting caller.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the sync core.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Coarse classification used for propagation decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection-level failure.
    Transport,
    /// Per-request deadline exceeded.
    Timeout,
    /// Credentials rejected.
    Auth,
    /// Malformed or unsuccessful response.
    Validation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Timeout => write!(f, "timeout"),
            Self::Auth => write!(f, "auth"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// Errors surfaced by the token manager, transport client, and reconciler.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The duplex channel failed to open or dropped.
    #[error("transport error: {0}")]
    Transport(String),

    /// A request was issued while no connection was established.
    #[error("not connected")]
    NotConnected,

    /// The connection was torn down while the request was pending.
    #[error("transport closed before a response arrived")]
    Closed,

    /// The reconnect budget is exhausted; only an explicit connect recovers.
    #[error("connection is terminal after {attempts} failed reconnect attempts")]
    Terminal {
        /// Reconnect attempts made before giving up.
        attempts: u32,
    },

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// What was being waited on.
        operation: String,
        /// How long we waited.
        timeout_ms: u64,
    },

    /// Credentials were rejected or could not be renewed.
    #[error("auth error: {0}")]
    Auth(String),

    /// The response did not have the expected shape.
    #[error("validation error: {0}")]
    Validation(String),

    /// The backend answered but reported failure.
    #[error("remote error ({code}): {message}")]
    Remote {
        /// Backend-supplied error code.
        code: String,
        /// Backend-supplied message.
        message: String,
    },

    /// Every candidate request name was tried and none produced a usable answer.
    #[error("no candidate accepted the request (tried: {})", attempted.join(", "))]
    ProbeExhausted {
        /// Request names tried, in order.
        attempted: Vec<String>,
    },
}

impl SyncError {
    /// Build a timeout error for the named operation.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::NotConnected | Self::Closed | Self::Terminal { .. } => {
                ErrorKind::Transport
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Validation(_) | Self::Remote { .. } | Self::ProbeExhausted { .. } => {
                ErrorKind::Validation
            }
        }
    }

    /// Whether this error must propagate to the session and force a logout.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }

    /// Whether the core recovers from this error on its own (reconnect, retry).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Terminal { .. } => false,
            other => matches!(other.kind(), ErrorKind::Transport | ErrorKind::Timeout),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
