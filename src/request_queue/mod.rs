//! # Request Queue Module
//!
//! Internal implementation of the paced admission queue.
//!
//! ## Module Structure
//!
//! ```text
//!     request_queue/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── config.rs       (Pacing and retry settings)
//!     ├── utils.rs        (Sleep primitive and timestamps)
//!     ├── state.rs        (FIFO of slots, last grant, processing flag)
//!     ├── pause.rs        (Manual pause gate and its notifications)
//!     ├── processor.rs    (Drain loop and slot acquisition)
//!     ├── search.rs       (Catalog client seam and request types)
//!     ├── retry.rs        (Gated, retrying search calls)
//!     └── metrics.rs      (Snapshot for monitoring)
//! ```
//!
//! ## Call Flow
//!
//! ```text
//!     search_with_rate_limit()
//!          │
//!          ▼
//!     ┌───────────┐
//!     │ PauseGate │ ◄── user pressed "pause"?
//!     └─────┬─────┘
//!           ▼
//!     ┌───────────┐
//!     │ Processor │ ◄── FIFO slot, paced grants
//!     └─────┬─────┘
//!           ▼
//!     ┌───────────┐
//!     │  Client   │ ◄── CatalogSearch impl, retried on failure
//!     └───────────┘
//! ```

mod config;
mod metrics;
mod pause;
mod processor;
mod retry;
mod search;
mod state;
mod utils;

/// Pacing and retry configuration
pub use config::{
    ConfigError, QueueConfig, DEFAULT_EVENT_CAPACITY, EXTERNAL_REQUESTS_PER_MINUTE,
    MAX_REQUESTS_PER_MINUTE, MAX_RETRIES, MIN_REQUEST_INTERVAL, RETRY_BASE_DELAY_MS,
    SAFETY_DELAY_MS,
};

/// Monitoring snapshot
pub use metrics::{QueueMetrics, QueueStatus, BACKLOG_THRESHOLD};

/// Manual pause gate and its notifications
pub use pause::{ObserverError, PauseEvent, PauseGate, PauseObserver};

/// The queue itself
pub use processor::{RequestQueue, SlotTicket};

/// Retry schedule
pub use retry::RetryPolicy;

/// Catalog client seam
pub use search::{AdvancedSearchRequest, CatalogSearch, SearchRequest, DEFAULT_PAGE, DEFAULT_PER_PAGE};

/// Sleep primitive and timestamps
pub use utils::{current_time_ms, sleep_for, sleep_ms};
