//! # Request Queue Configuration
//!
//! Pacing and retry settings for the request queue. The defaults are tuned
//! for a catalog API that allows 30 requests per minute: the queue targets
//! 28 so clock drift and network jitter never push us over the real cap.
//!
//! ```text
//!     One grant cycle with the defaults:
//!
//!     grant ──► 50ms safety ──► wait out min interval ──► grant
//!       │                                                   │
//!       └──────────── 2142.86ms + 50ms = 2192.86ms ─────────┘
//! ```

use std::time::Duration;
use thiserror::Error;

/// Requests per minute the queue allows. Deliberately below
/// [`EXTERNAL_REQUESTS_PER_MINUTE`].
pub const MAX_REQUESTS_PER_MINUTE: u32 = 28;

/// The limit published by the catalog API.
pub const EXTERNAL_REQUESTS_PER_MINUTE: u32 = 30;

/// Fixed delay the drain loop sleeps after every grant, in milliseconds.
pub const SAFETY_DELAY_MS: u64 = 50;

/// How many times a failed search call is retried.
pub const MAX_RETRIES: u32 = 3;

/// Base unit of the linear retry backoff, in milliseconds.
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Minimum spacing between two grants, derived from
/// [`MAX_REQUESTS_PER_MINUTE`] (about 2142.857ms).
pub const MIN_REQUEST_INTERVAL: Duration =
    Duration::from_nanos(60_000_000_000 / MAX_REQUESTS_PER_MINUTE as u64);

/// Buffered pause events per subscriber before slow receivers start lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 16;

/// Errors raised when a [`QueueConfig`] cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A zero ceiling would make the minimum interval infinite.
    #[error("max_requests_per_minute must be greater than 0")]
    ZeroRequestsPerMinute,

    /// The ceiling is above the limit the remote API enforces.
    #[error("max_requests_per_minute ({configured}) exceeds the external limit ({external})")]
    AboveExternalLimit {
        /// Configured ceiling.
        configured: u32,
        /// Limit enforced by the remote side.
        external: u32,
    },

    /// Broadcast channels need room for at least one event.
    #[error("event_capacity must be greater than 0")]
    ZeroEventCapacity,
}

/// Configuration for a [`RequestQueue`](crate::RequestQueue).
///
/// Fixed once the queue is built; there is no runtime mutation.
///
/// ## Examples
///
/// ```rust
/// use rategate::QueueConfig;
///
/// // Catalog defaults: 28/min, 50ms safety delay, 3 retries
/// let config = QueueConfig::default();
/// assert!(config.validate().is_ok());
///
/// // A different API with a 90/min cap, paced at 85
/// let config = QueueConfig::per_minute(85).with_external_limit(90);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Ceiling on grants per minute.
    pub max_requests_per_minute: u32,

    /// Limit enforced by the remote API. `None` skips the headroom check.
    pub external_requests_per_minute: Option<u32>,

    /// Sleep after each grant, on top of the minimum interval.
    pub safety_delay_ms: u64,

    /// Retries after the first failed attempt.
    pub max_retries: u32,

    /// Backoff unit; retry `n` (1-based) waits `n * retry_base_delay_ms`.
    pub retry_base_delay_ms: u64,

    /// Capacity of the pause event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    /// Catalog defaults: 28 requests per minute against a 30/min API,
    /// 50ms safety delay, 3 retries at 1s/2s/3s.
    fn default() -> Self {
        Self {
            max_requests_per_minute: MAX_REQUESTS_PER_MINUTE,
            external_requests_per_minute: Some(EXTERNAL_REQUESTS_PER_MINUTE),
            safety_delay_ms: SAFETY_DELAY_MS,
            max_retries: MAX_RETRIES,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with explicit pacing values and default
    /// retry settings. No external limit is recorded.
    pub fn new(max_requests_per_minute: u32, safety_delay_ms: u64) -> Self {
        Self {
            max_requests_per_minute,
            external_requests_per_minute: None,
            safety_delay_ms,
            ..Self::default()
        }
    }

    /// Paces at `requests_per_minute` with the default safety delay.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(requests_per_minute, SAFETY_DELAY_MS)
    }

    /// Records the limit the remote API enforces.
    pub fn with_external_limit(mut self, requests_per_minute: u32) -> Self {
        self.external_requests_per_minute = Some(requests_per_minute);
        self
    }

    /// Sets the post-grant safety delay.
    pub fn with_safety_delay_ms(mut self, ms: u64) -> Self {
        self.safety_delay_ms = ms;
        self
    }

    /// Sets the retry ceiling and backoff unit.
    pub fn with_retries(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    /// Sets the pause event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroRequestsPerMinute`] if the ceiling is 0
    /// - [`ConfigError::AboveExternalLimit`] if the ceiling exceeds the
    ///   recorded external limit
    /// - [`ConfigError::ZeroEventCapacity`] if `event_capacity` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests_per_minute == 0 {
            return Err(ConfigError::ZeroRequestsPerMinute);
        }

        if let Some(external) = self.external_requests_per_minute {
            if self.max_requests_per_minute > external {
                return Err(ConfigError::AboveExternalLimit {
                    configured: self.max_requests_per_minute,
                    external,
                });
            }
        }

        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }

        Ok(())
    }

    /// Strict minimum time between two grants.
    ///
    /// Returns [`Duration::ZERO`] for an (invalid) zero ceiling.
    pub fn min_interval(&self) -> Duration {
        if self.max_requests_per_minute == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(60_000_000_000 / u64::from(self.max_requests_per_minute))
    }

    /// Minimum interval in fractional milliseconds, for display.
    pub fn min_interval_ms(&self) -> f64 {
        self.min_interval().as_secs_f64() * 1000.0
    }

    /// Post-grant safety delay.
    pub fn safety_delay(&self) -> Duration {
        Duration::from_millis(self.safety_delay_ms)
    }

    /// Spacing the drain loop keeps between consecutive grants under load:
    /// the minimum interval plus the safety delay.
    pub fn grant_spacing(&self) -> Duration {
        self.min_interval() + self.safety_delay()
    }

    /// Grants per minute actually achievable with the safety delay applied.
    pub fn effective_rate_per_minute(&self) -> f64 {
        let spacing = self.grant_spacing().as_secs_f64();
        if spacing == 0.0 {
            0.0
        } else {
            60.0 / spacing
        }
    }
}
