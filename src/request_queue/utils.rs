//! # Timing Helpers (utils.rs)
//!
//! The sleep primitive every suspension point in the queue goes through,
//! plus wall-clock timestamps for events.
//!
//! Sleeps run on the Tokio timer, so tests can drive them with a paused
//! clock. Timestamps come from a monotonic base captured at first use, so a
//! system clock jump never makes event times go backwards.

use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

static START_TIME_BASE: OnceLock<(Instant, u64)> = OnceLock::new();

/// Suspends the current task for `ms` milliseconds.
///
/// Not cancellable other than by dropping the future. A duration of 0
/// still yields to the scheduler once.
///
/// # Example
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// rategate::sleep_ms(5).await;
/// # }
/// ```
pub async fn sleep_ms(ms: u64) {
    sleep_for(Duration::from_millis(ms)).await
}

/// Suspends the current task for `duration`.
///
/// Used where millisecond granularity is too coarse, e.g. the fractional
/// minimum interval.
pub async fn sleep_for(duration: Duration) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(duration).await;
    }
}

/// Returns the current time in milliseconds since UNIX epoch.
///
/// # Example
///
/// ```rust
/// use rategate::current_time_ms;
///
/// let now = current_time_ms();
/// assert!(now > 0);
/// ```
#[inline]
pub fn current_time_ms() -> u64 {
    let (start, base_ms) = START_TIME_BASE.get_or_init(|| {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        (Instant::now(), epoch_ms)
    });
    base_ms.saturating_add(start.elapsed().as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_monotonicity() {
        let mut last_ms = 0;

        for _ in 0..10 {
            let ms = current_time_ms();
            assert!(ms >= last_ms);
            last_ms = ms;
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_ms_waits_requested_duration() {
        let start = tokio::time::Instant::now();
        sleep_ms(250).await;
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() < Duration::from_millis(260));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_sleep_completes_without_advancing() {
        let start = tokio::time::Instant::now();
        sleep_ms(0).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_for_sub_millisecond_precision() {
        let start = tokio::time::Instant::now();
        sleep_for(Duration::from_micros(2_142_857)).await;
        assert!(start.elapsed() >= Duration::from_micros(2_142_857));
    }
}
