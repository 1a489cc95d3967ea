//! Backoff arithmetic shared by the rate limiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::RateLimitBackoff;

static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// `base_ms * 2^(retry-1)` for a 1-based retry number, capped at `max_ms`.
pub fn exponential_backoff_ms(base_ms: u64, retry: usize, max_ms: u64) -> u64 {
    let shift = retry.saturating_sub(1).min(20) as u32;
    base_ms
        .saturating_mul(1_u64 << shift)
        .min(max_ms.max(base_ms))
}

/// Adds jitter in `[0, backoff / 4]` on top of the exponential backoff, so the
/// sequence stays strictly increasing until the cap is reached.
pub fn jittered_backoff_ms(base_ms: u64, retry: usize, max_ms: u64, jitter_enabled: bool) -> u64 {
    let backoff = exponential_backoff_ms(base_ms, retry, max_ms);
    let width = backoff / 4;
    if !jitter_enabled || width == 0 {
        return backoff;
    }
    let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17) ^ 0xA24B_AED4_963E_E407;
    backoff.saturating_add(mixed % width.saturating_add(1))
}

/// Wait before rate-limit retry number `retry`; a remote `Retry-After` hint acts as a floor.
pub fn rate_limit_delay(
    backoff: &RateLimitBackoff,
    retry: usize,
    retry_after: Option<Duration>,
    jitter_enabled: bool,
) -> Duration {
    let delay_ms = match backoff {
        RateLimitBackoff::Exponential { base_ms, max_ms, .. } => {
            jittered_backoff_ms(*base_ms, retry, *max_ms, jitter_enabled)
        }
        RateLimitBackoff::Fixed { wait_ms, .. } => *wait_ms,
    };
    let delay = Duration::from_millis(delay_ms);
    match retry_after {
        Some(retry_after) => delay.max(retry_after),
        None => delay,
    }
}

/// Remaining wait so that at least `min_interval` separates two calls.
pub fn pacing_delay(
    last_call_at: Option<Duration>,
    now: Duration,
    min_interval: Duration,
) -> Duration {
    match last_call_at {
        Some(last) => min_interval.saturating_sub(now.saturating_sub(last)),
        None => Duration::ZERO,
    }
}
