//! Fallback probing across request-name aliases.
//!
//! Backends deployed at different times recognize different names for the
//! same request. A [`ProbeChain`] lists candidates in preference order, each
//! with a short timeout; the first well-formed answer wins.

use std::time::Duration;

use async_trait::async_trait;
use roomdesk_core::{Result, SyncError};
use serde_json::Value;
use tracing::debug;

/// Anything that can issue a correlated request.
#[async_trait]
pub trait Requester: Send + Sync {
    /// Send `name` with `payload` and wait up to `timeout` for the response.
    async fn request(&self, name: &str, payload: Value, timeout: Duration) -> Result<Value>;
}

/// One request name to try.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestCandidate {
    /// Request name on the wire.
    pub name: String,
    /// Deadline for this attempt.
    pub timeout: Duration,
}

/// Ordered list of request candidates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeChain {
    candidates: Vec<RequestCandidate>,
}

impl ProbeChain {
    /// Chain whose aliases all use `timeout`.
    pub fn new<I, S>(names: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: names
                .into_iter()
                .map(|name| RequestCandidate {
                    name: name.into(),
                    timeout,
                })
                .collect(),
        }
    }

    /// Append a candidate with its own timeout.
    #[must_use]
    pub fn then(mut self, name: impl Into<String>, timeout: Duration) -> Self {
        self.candidates.push(RequestCandidate {
            name: name.into(),
            timeout,
        });
        self
    }

    /// Candidates in order.
    pub fn candidates(&self) -> &[RequestCandidate] {
        &self.candidates
    }

    /// Name of the first candidate.
    pub fn primary(&self) -> Option<&str> {
        self.candidates.first().map(|c| c.name.as_str())
    }

    /// Try each candidate until one yields a response `accept` takes.
    ///
    /// Timeouts, remote errors, and rejected shapes move on to the next
    /// candidate. Connection-level and auth failures stop the chain, since no
    /// alias can succeed over a dead or unauthorized link.
    pub async fn run<T, F>(&self, requester: &dyn Requester, payload: &Value, accept: F) -> Result<T>
    where
        F: Fn(Value) -> Result<T> + Send,
        T: Send,
    {
        let mut attempted = Vec::with_capacity(self.candidates.len());
        for candidate in &self.candidates {
            attempted.push(candidate.name.clone());
            let outcome = requester
                .request(&candidate.name, payload.clone(), candidate.timeout)
                .await
                .and_then(&accept);
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if stops_chain(&err) => return Err(err),
                Err(err) => {
                    debug!(candidate = %candidate.name, error = %err, "probe candidate failed");
                }
            }
        }
        Err(SyncError::ProbeExhausted { attempted })
    }
}

fn stops_chain(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::NotConnected
            | SyncError::Closed
            | SyncError::Terminal { .. }
            | SyncError::Transport(_)
            | SyncError::Auth(_)
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
