//! # Rategate - Paced Admission Queue for Rate-Limited Catalog APIs
//!
//! Rategate sits between an application and a third-party catalog API that
//! publishes a hard request limit (30 per minute, say). Every outbound call
//! takes a slot in a single FIFO queue; one drain loop grants slots no
//! faster than the configured pace. A manual pause gate lets the user freeze
//! all traffic from the UI, and search calls that fail are retried with a
//! linear backoff, each retry going back through the gate and the queue.
//!
//! ## How Grants Are Paced
//!
//! ```text
//!     Grant timeline with the defaults (28/min, 50ms safety delay):
//!
//!     t=0ms      t≈2193ms     t≈4386ms
//!      │            │            │
//!      ▼            ▼            ▼
//!     [s1]────────►[s2]────────►[s3]
//!       2142.86ms interval + 50ms safety
//! ```
//!
//! - **Slot** = one caller's place in the queue
//! - **Grant** = permission for that caller to send its request
//! - **Pause gate** = user-controlled switch that holds every grant and call
//!
//! ## Quick Start
//!
//! ### Taking a Slot
//!
//! ```rust
//! use rategate::RequestQueue;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = RequestQueue::new();
//!
//! queue.acquire_slot().await;
//! // Safe to call the API now.
//! # }
//! ```
//!
//! ### Gated, Retried Searches
//!
//! ```rust
//! use async_trait::async_trait;
//! use rategate::{AdvancedSearchRequest, CatalogSearch, RequestQueue, SearchRequest};
//!
//! struct Catalog;
//!
//! #[derive(Debug)]
//! struct CatalogError;
//!
//! impl std::fmt::Display for CatalogError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "catalog unavailable")
//!     }
//! }
//!
//! impl std::error::Error for CatalogError {}
//!
//! #[async_trait]
//! impl CatalogSearch for Catalog {
//!     type Output = Vec<String>;
//!     type Error = CatalogError;
//!
//!     async fn search(&self, request: &SearchRequest) -> Result<Vec<String>, CatalogError> {
//!         Ok(vec![request.query.clone()])
//!     }
//!
//!     async fn advanced_search(
//!         &self,
//!         request: &AdvancedSearchRequest,
//!     ) -> Result<Vec<String>, CatalogError> {
//!         Ok(vec![request.query.clone()])
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = RequestQueue::new();
//! let results = queue
//!     .search_with_rate_limit(&Catalog, &SearchRequest::new("Berserk"), true)
//!     .await
//!     .unwrap();
//! assert_eq!(results, vec!["Berserk".to_string()]);
//! # }
//! ```
//!
//! ### Pausing From the UI
//!
//! ```rust
//! use rategate::RequestQueue;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = RequestQueue::new();
//! let mut events = queue.pause_gate().subscribe();
//!
//! queue.set_paused(true);   // "Pause matching" button
//! assert!(queue.is_paused());
//! assert!(events.recv().await.unwrap().paused);
//!
//! queue.set_paused(false);  // "Resume"
//! # }
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Matching / UI layer   │
//!                    └──────────┬──────────────┘
//!                               │
//!                    ┌──────────▼──────────────┐
//!                    │      RequestQueue       │
//!                    ├─────────────────────────┤
//!                    │  • acquire_slot()       │
//!                    │  • search_with_rate_... │
//!                    │  • set_paused()         │
//!                    └──────────┬──────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                              │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │     Drain Loop      │       │     Pause Gate       │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • FIFO grants       │       │ • Waiter list        │
//!     │ • Min interval      │       │ • Observers          │
//!     │ • Safety delay      │       │ • Event broadcast    │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Grants happen in enqueue order, pause or no pause.
//! - Consecutive grants are at least `min_interval + safety_delay` apart.
//! - Only one drain loop runs per queue.
//! - A wrapped search never reaches the client without passing the gate
//!   and (except a first attempt with `acquire_limit = false`) a grant.
//! - Retry exhaustion returns the client's own error.
//!
//! ## Runtime
//!
//! Built on Tokio. The drain loop is a spawned task, so slot acquisition
//! must happen inside a Tokio runtime.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod request_queue;

// Public re-exports
pub use request_queue::{
    current_time_ms, sleep_for, sleep_ms, AdvancedSearchRequest, CatalogSearch, ConfigError,
    ObserverError, PauseEvent, PauseGate, PauseObserver, QueueConfig, QueueMetrics, QueueStatus,
    RequestQueue, RetryPolicy, SearchRequest, SlotTicket, BACKLOG_THRESHOLD,
    DEFAULT_EVENT_CAPACITY, DEFAULT_PAGE, DEFAULT_PER_PAGE, EXTERNAL_REQUESTS_PER_MINUTE,
    MAX_REQUESTS_PER_MINUTE, MAX_RETRIES, MIN_REQUEST_INTERVAL, RETRY_BASE_DELAY_MS,
    SAFETY_DELAY_MS,
};

/// A pause gate wrapped in `Arc`, the way the queue hands it out.
///
/// Useful when a UI component needs the gate without the whole queue.
pub type SharedPauseGate = std::sync::Arc<PauseGate>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
///
/// `std::sync::OnceLock` needs 1.70.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use rategate::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for code that issues catalog calls.

    pub use crate::{
        AdvancedSearchRequest, CatalogSearch, PauseEvent, PauseGate, QueueConfig, QueueMetrics,
        RequestQueue, RequestQueueBuilder, RetryPolicy, SearchRequest, SharedPauseGate,
    };
}

/// Builder for a [`RequestQueue`] with non-default settings.
///
/// ```rust
/// use rategate::RequestQueueBuilder;
///
/// // An API with a 90/min cap, paced at 85 with a 100ms safety margin
/// let queue = RequestQueueBuilder::new()
///     .max_requests_per_minute(85)
///     .external_limit(90)
///     .safety_delay_ms(100)
///     .retries(5, 500)
///     .build();
///
/// // Or handle bad settings yourself
/// let result = RequestQueueBuilder::new()
///     .max_requests_per_minute(0)
///     .try_build();
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RequestQueueBuilder {
    config: QueueConfig,
}

impl RequestQueueBuilder {
    /// Starts from the catalog defaults (see [`QueueConfig::default`]).
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
        }
    }

    /// Sets the grant ceiling per minute.
    pub fn max_requests_per_minute(mut self, requests: u32) -> Self {
        self.config.max_requests_per_minute = requests;
        self
    }

    /// Records the remote API's limit; the ceiling must stay at or below it.
    pub fn external_limit(mut self, requests: u32) -> Self {
        self.config.external_requests_per_minute = Some(requests);
        self
    }

    /// Drops the external limit check.
    pub fn no_external_limit(mut self) -> Self {
        self.config.external_requests_per_minute = None;
        self
    }

    /// Sets the post-grant safety delay.
    pub fn safety_delay_ms(mut self, ms: u64) -> Self {
        self.config.safety_delay_ms = ms;
        self
    }

    /// Sets the retry ceiling and backoff unit.
    pub fn retries(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.config.max_retries = max_retries;
        self.config.retry_base_delay_ms = base_delay_ms;
        self
    }

    /// Sets the pause event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Builds the queue.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. Use
    /// [`try_build`](Self::try_build) to handle the error.
    pub fn build(self) -> RequestQueue {
        RequestQueue::with_config(self.config)
    }

    /// Builds the queue, or reports why the configuration is unusable.
    ///
    /// # Errors
    ///
    /// See [`QueueConfig::validate`].
    pub fn try_build(self) -> Result<RequestQueue, ConfigError> {
        RequestQueue::try_with_config(self.config)
    }
}

impl Default for RequestQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}
