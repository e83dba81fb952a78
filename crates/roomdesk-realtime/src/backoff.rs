//! Reconnect backoff.

use std::time::Duration;

/// Jitter applied to every reconnect delay (±20%).
pub const JITTER_FACTOR: f64 = 0.2;

/// Exponential backoff with jitter.
///
/// `min(max_delay, base_delay * 2^attempt) * (1 + (random * 2 - 1) * jitter)`,
/// where `attempt` is zero-based and `random` is in `[0, 1)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    ((capped as f64) * jitter).round().max(0.0) as u64
}

/// Delay before reconnect attempt `attempt` (zero-based).
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(backoff_delay_with_random(
        attempt,
        base_ms,
        max_ms,
        JITTER_FACTOR,
        rand::random::<f64>(),
    ))
}
