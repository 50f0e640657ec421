//! # Queue Metrics
//!
//! Point-in-time snapshot of the request queue, for logs, debug panels and
//! tests.
//!
//! ```text
//!     Metrics Snapshot:
//!     ┌─────────────────────────────────────┐
//!     │  Status: Draining                   │
//!     │  Pending: 4   Granted: 120          │
//!     │  Calls: 118   Retries: 6            │
//!     │  Failures: 1                        │
//!     └─────────────────────────────────────┘
//! ```

use std::fmt;

/// Pending slots above which the queue counts as backlogged: roughly a
/// minute of work at the default pace.
pub const BACKLOG_THRESHOLD: usize = 28;

/// Snapshot of a [`RequestQueue`](crate::RequestQueue).
///
/// Counters are cumulative since the queue was built.
///
/// ```rust
/// use rategate::RequestQueue;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = RequestQueue::new();
/// let metrics = queue.metrics();
/// assert_eq!(metrics.total_granted, 0);
/// println!("{}", metrics.summary());
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMetrics {
    /// Slots ever enqueued.
    pub total_enqueued: u64,

    /// Slots granted by the drain loop (including grants nobody awaited).
    pub total_granted: u64,

    /// Slots waiting right now.
    pub pending: usize,

    /// Whether a drain loop is running.
    pub is_processing: bool,

    /// Whether the manual pause gate is active.
    pub is_paused: bool,

    /// Drain loops started. Each one runs until the queue empties.
    pub drain_loops_started: u64,

    /// Delegated search invocations, retries included.
    pub total_calls: u64,

    /// Invocations that failed and were retried.
    pub total_retries: u64,

    /// Logical calls that failed after exhausting retries.
    pub total_failures: u64,
}

impl QueueMetrics {
    /// Share of invocations that were retries (0.0 to 1.0).
    #[inline]
    pub fn retry_ratio(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_retries as f64 / self.total_calls as f64
        }
    }

    /// Share of logical calls that ended in failure (0.0 to 1.0).
    ///
    /// A logical call is one first attempt plus its retries.
    #[inline]
    pub fn failure_rate(&self) -> f64 {
        let logical = self.total_calls.saturating_sub(self.total_retries);
        if logical == 0 {
            0.0
        } else {
            self.total_failures as f64 / logical as f64
        }
    }

    /// More than [`BACKLOG_THRESHOLD`] slots are waiting.
    #[inline]
    pub fn is_backlogged(&self) -> bool {
        self.pending > BACKLOG_THRESHOLD
    }

    /// What the queue is doing right now.
    pub fn status(&self) -> QueueStatus {
        if self.is_paused {
            QueueStatus::Paused
        } else if self.is_processing {
            QueueStatus::Draining
        } else {
            QueueStatus::Idle
        }
    }

    /// Multi-line human-readable report.
    pub fn summary(&self) -> String {
        format!(
            "RequestQueue Metrics:\n\
             ├─ Queue:\n\
             │  ├─ Status: {}\n\
             │  ├─ Pending: {}\n\
             │  ├─ Enqueued: {}\n\
             │  ├─ Granted: {}\n\
             │  └─ Drain Loops: {}\n\
             └─ Calls:\n\
                ├─ Total: {}\n\
                ├─ Retries: {} ({:.2}%)\n\
                └─ Failures: {} ({:.2}%)",
            self.status(),
            self.pending,
            self.total_enqueued,
            self.total_granted,
            self.drain_loops_started,
            self.total_calls,
            self.total_retries,
            self.retry_ratio() * 100.0,
            self.total_failures,
            self.failure_rate() * 100.0,
        )
    }
}

impl fmt::Display for QueueMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Coarse state of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// No drain loop running, gate open.
    Idle,

    /// A drain loop is granting slots.
    Draining,

    /// The manual pause gate is holding everything.
    Paused,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Draining => write!(f, "Draining"),
            Self::Paused => write!(f, "Paused"),
        }
    }
}
