//! Backoff for upstream throttling (HTTP 429).

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with up to 10% jitter, capped at `max`.
///
/// `attempt` is 1-based; attempt 0 means "no wait".
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential = 2u32.saturating_pow(attempt - 1);
    let capped = base.saturating_mul(exponential).min(max);

    let jitter_range = capped.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    capped + Duration::from_millis(jitter)
}

/// Delay before the next attempt after a 429.
///
/// A numeric `Retry-After` header wins over the computed backoff; either way
/// the result never exceeds `max`.
pub fn throttle_delay(
    retry_after_header: Option<&str>,
    attempt: u32,
    base: Duration,
    max: Duration,
) -> Duration {
    retry_after_header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| calculate_backoff(attempt, base, max))
        .min(max)
}
