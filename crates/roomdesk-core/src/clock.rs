//! Wall-clock abstraction.
//!
//! Token expiry and realtime freshness are absolute timestamps (epoch
//! milliseconds), while timers run on tokio's monotonic clock. Components
//! take an `Arc<dyn Clock>` for the former and use `tokio::time` for the
//! latter; [`PausedClock`] ties both together so tests that pause tokio time
//! see the wall clock advance in lockstep.

use std::sync::Arc;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Real system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Wall clock derived from tokio's (pausable) monotonic clock.
///
/// `now_ms()` is `epoch_ms + elapsed`, where `elapsed` is measured with
/// [`tokio::time::Instant`]. Under `tokio::time::pause()` it only moves
/// when the runtime advances time.
#[derive(Clone, Debug)]
pub struct PausedClock {
    epoch_ms: i64,
    origin: tokio::time::Instant,
}

impl PausedClock {
    /// Anchor the clock at `epoch_ms` as of now.
    pub fn starting_at(epoch_ms: i64) -> Self {
        Self {
            epoch_ms,
            origin: tokio::time::Instant::now(),
        }
    }

    /// Convenience constructor returning a shareable handle.
    pub fn shared(epoch_ms: i64) -> Arc<dyn Clock> {
        Arc::new(Self::starting_at(epoch_ms))
    }
}

impl Clock for PausedClock {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn now_ms(&self) -> i64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as i64
    }
}

/// A clock that never moves.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0
    }
}

/// Milliseconds from `now` until `deadline`, clamped at zero.
pub fn millis_until(now: i64, deadline: i64) -> u64 {
    u64::try_from(deadline.saturating_sub(now)).unwrap_or(0)
}
