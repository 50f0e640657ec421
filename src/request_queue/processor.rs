//! # Request Queue Processor
//!
//! Admission control for outbound catalog calls. Callers take a slot, the
//! slot joins a FIFO, and a single drain loop hands slots out one at a time,
//! never faster than the configured pace and never while the manual pause
//! gate is active.
//!
//! ```text
//!     acquire_slot() ──► enqueue ──► [s1][s2][s3] ──► drain loop
//!                           │                             │
//!                 (no loop running?)          ┌───────────┴───────────┐
//!                           │                 │ 1. wait while paused  │
//!                           └──► spawn ──────►│ 2. wait out spacing   │
//!                                             │ 3. pop head, grant    │
//!                                             │ 4. safety delay       │
//!                                             │ 5. exit if empty      │
//!                                             └───────────────────────┘
//! ```
//!
//! Pausing never touches the queue itself, so grant order is enqueue order
//! across any number of pause/resume cycles.

use super::{
    config::{ConfigError, QueueConfig},
    metrics::QueueMetrics,
    pause::PauseGate,
    state::{QueueState, RequestSlot},
    utils::sleep_for,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub(crate) struct QueueInner {
    pub(crate) config: QueueConfig,
    state: QueueState,
    gate: Arc<PauseGate>,
    // Runtime the queue was built in, if any. Lets threads without a
    // runtime of their own start the drain loop.
    handle: Option<Handle>,
    next_slot_id: AtomicU64,
    total_enqueued: AtomicU64,
    total_granted: AtomicU64,
    drain_loops_started: AtomicU64,
    pub(crate) total_calls: AtomicU64,
    pub(crate) total_retries: AtomicU64,
    pub(crate) total_failures: AtomicU64,
}

/// Rate-limited FIFO admission queue.
///
/// Cheap to clone; clones share one queue, one pause gate and one drain
/// loop. Build it once at startup and hand clones to whatever needs to talk
/// to the catalog.
///
/// ## Example
///
/// ```rust
/// use rategate::RequestQueue;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = RequestQueue::new();
///
/// queue.acquire_slot().await;
/// // First grant is immediate; issue the request now.
/// # }
/// ```
#[derive(Clone)]
pub struct RequestQueue {
    pub(crate) inner: Arc<QueueInner>,
}

impl RequestQueue {
    /// Creates a queue with the catalog defaults (see [`QueueConfig::default`]).
    pub fn new() -> Self {
        Self::from_validated(QueueConfig::default())
    }

    /// Creates a queue with a custom configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid (see [`QueueConfig::validate`]).
    /// Use [`try_with_config`](Self::try_with_config) to handle the error.
    pub fn with_config(config: QueueConfig) -> Self {
        config.validate().expect("Invalid request queue configuration");
        Self::from_validated(config)
    }

    /// Creates a queue with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns the validation error if the configuration is unusable.
    pub fn try_with_config(config: QueueConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    fn from_validated(config: QueueConfig) -> Self {
        let gate = Arc::new(PauseGate::with_event_capacity(config.event_capacity));
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: QueueState::new(),
                gate,
                handle: Handle::try_current().ok(),
                next_slot_id: AtomicU64::new(0),
                total_enqueued: AtomicU64::new(0),
                total_granted: AtomicU64::new(0),
                drain_loops_started: AtomicU64::new(0),
                total_calls: AtomicU64::new(0),
                total_retries: AtomicU64::new(0),
                total_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Waits for this caller's turn.
    ///
    /// Enqueues a fresh slot, starts the drain loop if none is running, and
    /// returns once that slot is granted.
    pub async fn acquire_slot(&self) {
        self.enqueue().granted().await;
    }

    /// Enqueues a slot now and returns a ticket to wait on later.
    ///
    /// The slot's position is fixed at the moment of this call, which makes
    /// it the tool for callers that need a specific order across tasks.
    /// Dropping the ticket abandons the wait; the slot is still granted in
    /// turn, with nobody listening.
    ///
    /// The drain loop runs on the caller's Tokio runtime, or on the runtime
    /// the queue was built in when the caller has none.
    ///
    /// # Panics
    ///
    /// Panics if neither runtime exists. The queue is left untouched, so
    /// later calls from inside a runtime work normally.
    pub fn enqueue(&self) -> SlotTicket {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => match &self.inner.handle {
                Some(handle) => handle.clone(),
                None => panic!(
                    "RequestQueue::enqueue must be called from a Tokio runtime \
                     or on a queue built inside one"
                ),
            },
        };

        let id = self.inner.next_slot_id.fetch_add(1, Ordering::Relaxed);
        let (slot, grant_rx) = RequestSlot::new(id);
        self.inner.total_enqueued.fetch_add(1, Ordering::Relaxed);

        if self.inner.state.enqueue(slot) {
            let loop_no = self.inner.drain_loops_started.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Slot {} starts drain loop #{}", id, loop_no);
            handle.spawn(drain(DrainGuard::new(Arc::clone(&self.inner))));
        } else {
            debug!("Slot {} queued behind active drain loop", id);
        }

        SlotTicket { id, grant_rx }
    }

    /// The pause gate shared by this queue and its search wrappers.
    pub fn pause_gate(&self) -> &Arc<PauseGate> {
        &self.inner.gate
    }

    /// Shorthand for `pause_gate().is_paused()`.
    pub fn is_paused(&self) -> bool {
        self.inner.gate.is_paused()
    }

    /// Shorthand for `pause_gate().set_paused(paused)`.
    pub fn set_paused(&self, paused: bool) {
        self.inner.gate.set_paused(paused)
    }

    /// Shorthand for `pause_gate().wait_while_paused()`.
    pub async fn wait_while_paused(&self) {
        self.inner.gate.wait_while_paused().await
    }

    /// The configuration this queue was built with.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Slots waiting for a grant.
    pub fn pending(&self) -> usize {
        self.inner.state.pending_len()
    }

    /// Whether a drain loop is running.
    pub fn is_processing(&self) -> bool {
        self.inner.state.is_processing()
    }

    /// Time of the most recent grant, `None` before the first one.
    pub fn last_grant_time(&self) -> Option<Instant> {
        self.inner.state.last_grant_time()
    }

    /// Snapshot of counters and state.
    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            total_enqueued: self.inner.total_enqueued.load(Ordering::Relaxed),
            total_granted: self.inner.total_granted.load(Ordering::Relaxed),
            pending: self.pending(),
            is_processing: self.is_processing(),
            is_paused: self.is_paused(),
            drain_loops_started: self.inner.drain_loops_started.load(Ordering::Relaxed),
            total_calls: self.inner.total_calls.load(Ordering::Relaxed),
            total_retries: self.inner.total_retries.load(Ordering::Relaxed),
            total_failures: self.inner.total_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestQueue")
            .field("max_requests_per_minute", &self.inner.config.max_requests_per_minute)
            .field("pending", &self.pending())
            .field("is_processing", &self.is_processing())
            .field("is_paused", &self.is_paused())
            .finish()
    }
}

/// A queued slot, returned by [`RequestQueue::enqueue`].
#[derive(Debug)]
#[must_use = "a ticket does nothing unless awaited with `granted()`"]
pub struct SlotTicket {
    id: u64,
    grant_rx: oneshot::Receiver<()>,
}

impl SlotTicket {
    /// Sequence number of the slot; lower numbers are granted first.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits until the slot is granted and returns its id.
    ///
    /// If the drain loop is torn down with the runtime before reaching the
    /// slot, this never resolves: a caller is never let through ungranted.
    pub async fn granted(self) -> u64 {
        if self.grant_rx.await.is_err() {
            warn!(
                "Slot {} dropped before grant (drain loop gone with its runtime); caller will wait forever",
                self.id
            );
            std::future::pending::<()>().await;
        }
        self.id
    }
}

/// Owns the processing flag for one drain loop.
///
/// Built before the loop is spawned, so it is dropped even if the task is
/// never polled. A loop that ends any way other than through
/// `finish_if_idle` (runtime shutdown, say) releases the flag here and
/// leaves its pending slots for the next enqueue to pick up.
struct DrainGuard {
    inner: Arc<QueueInner>,
    finished: bool,
}

impl DrainGuard {
    fn new(inner: Arc<QueueInner>) -> Self {
        Self {
            inner,
            finished: false,
        }
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.finished {
            let left = self.inner.state.release_processing();
            warn!("Drain loop dropped with {} slots pending", left);
        }
    }
}

/// Serial drain loop. Exactly one runs while slots are pending.
async fn drain(mut guard: DrainGuard) {
    let inner = Arc::clone(&guard.inner);
    info!("Drain loop started with {} pending", inner.state.pending_len());

    loop {
        wait_for_grant_window(&inner).await;

        if let Some(slot) = inner.state.pop_front() {
            inner.state.set_last_grant_time(Instant::now());
            inner.total_granted.fetch_add(1, Ordering::Relaxed);
            let id = slot.id();
            if slot.grant() {
                debug!("Granted slot {}", id);
            } else {
                debug!("Granted slot {} with no listener", id);
            }
        }

        sleep_for(inner.config.safety_delay()).await;

        if inner.state.finish_if_idle() {
            guard.finished = true;
            break;
        }
    }

    info!("Drain loop finished, queue empty");
}

/// Returns when the gate is open and the grant spacing has passed since the
/// previous grant. The gate is checked again after every spacing sleep.
async fn wait_for_grant_window(inner: &QueueInner) {
    let spacing = inner.config.grant_spacing();
    loop {
        inner.gate.wait_while_paused().await;

        let remaining = match inner.state.last_grant_time() {
            Some(last) => spacing.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };
        if remaining.is_zero() {
            return;
        }

        debug!("Pacing next grant by {:?}", remaining);
        sleep_for(remaining).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::time::sleep;

    fn fast_config() -> QueueConfig {
        // 600/min = 100ms interval, plus 10ms safety.
        QueueConfig::new(600, 10)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_grant_is_immediate() {
        let queue = RequestQueue::new();
        let start = Instant::now();

        queue.acquire_slot().await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(queue.last_grant_time().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_slots_default_spacing() {
        let queue = RequestQueue::new();
        let start = Instant::now();
        let tickets: Vec<_> = (0..3).map(|_| queue.enqueue()).collect();

        let mut grants = Vec::new();
        for ticket in tickets {
            ticket.granted().await;
            grants.push(start.elapsed());
        }

        let spacing = queue.config().grant_spacing();
        assert_eq!(grants[0], Duration::ZERO);
        assert!(grants[1] >= spacing, "second grant at {:?}", grants[1]);
        assert!(grants[1] <= Duration::from_millis(2200));
        assert!(grants[2] - grants[1] >= spacing);
        assert!(grants[2] >= Duration::from_millis(4385));
        assert!(grants[2] <= Duration::from_millis(4400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grants_follow_enqueue_order() {
        let queue = RequestQueue::with_config(fast_config());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let ticket = queue.enqueue();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let id = ticket.granted().await;
                order.lock().push(id);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_drain_loop_for_burst() {
        let queue = RequestQueue::with_config(fast_config());

        let a = queue.enqueue();
        let b = queue.enqueue();
        assert!(queue.is_processing());
        assert_eq!(queue.metrics().drain_loops_started, 1);

        a.granted().await;
        b.granted().await;
        sleep(Duration::from_millis(20)).await;

        assert!(!queue.is_processing());
        assert_eq!(queue.metrics().drain_loops_started, 1);
        assert_eq!(queue.metrics().total_granted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_loop_after_idle() {
        let queue = RequestQueue::with_config(fast_config());

        queue.acquire_slot().await;
        sleep(Duration::from_millis(50)).await;
        assert!(!queue.is_processing());

        // Spacing is still honoured across loops.
        let start = Instant::now();
        queue.acquire_slot().await;
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(queue.metrics().drain_loops_started, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_grants() {
        let queue = RequestQueue::new();
        queue.set_paused(true);

        let start = Instant::now();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.acquire_slot().await;
                Instant::now()
            })
        };

        sleep(Duration::from_millis(500)).await;
        assert!(!waiter.is_finished());
        assert_eq!(queue.pending(), 1);
        queue.set_paused(false);

        let granted_at = waiter.await.unwrap();
        assert!(granted_at - start >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_during_spacing_delays_grant() {
        let queue = RequestQueue::with_config(fast_config());
        queue.acquire_slot().await;

        let start = Instant::now();
        let second = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.acquire_slot().await;
                Instant::now()
            })
        };

        sleep(Duration::from_millis(50)).await;
        queue.set_paused(true);
        sleep(Duration::from_millis(400)).await;
        assert!(!second.is_finished());
        queue.set_paused(false);

        let granted_at = second.await.unwrap();
        assert!(granted_at - start >= Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_ticket_is_skipped() {
        let queue = RequestQueue::with_config(fast_config());

        let abandoned = queue.enqueue();
        let kept = queue.enqueue();
        drop(abandoned);

        assert_eq!(kept.granted().await, 1);
        assert_eq!(queue.metrics().total_granted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_with_dropped_slot_never_resolves() {
        let (slot, grant_rx) = RequestSlot::new(3);
        let ticket = SlotTicket { id: 3, grant_rx };
        drop(slot);

        let waited = tokio::time::timeout(Duration::from_secs(60), ticket.granted()).await;
        assert!(waited.is_err());
    }

    fn current_thread_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_enqueue_without_runtime_leaves_queue_usable() {
        let queue = RequestQueue::with_config(fast_config());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = queue.enqueue();
        }));
        assert!(result.is_err());
        assert!(!queue.is_processing());
        assert_eq!(queue.pending(), 0);

        current_thread_runtime().block_on(async {
            tokio::time::timeout(Duration::from_secs(5), queue.acquire_slot())
                .await
                .unwrap();
        });
    }

    #[test]
    fn test_enqueue_from_plain_thread_uses_construction_runtime() {
        let rt = current_thread_runtime();
        let queue = {
            let _enter = rt.enter();
            RequestQueue::with_config(fast_config())
        };

        let ticket = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.enqueue()).join().unwrap()
        };

        let id = rt.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), ticket.granted())
                .await
                .unwrap()
        });
        assert_eq!(id, 0);
    }

    #[test]
    fn test_runtime_shutdown_releases_drain_loop() {
        let queue = RequestQueue::with_config(fast_config());
        queue.set_paused(true);

        let rt = current_thread_runtime();
        rt.block_on(async {
            let _ticket = queue.enqueue();
            tokio::task::yield_now().await;
        });
        assert!(queue.is_processing());
        drop(rt);

        assert!(!queue.is_processing());
        assert_eq!(queue.pending(), 1);

        queue.set_paused(false);
        current_thread_runtime().block_on(async {
            tokio::time::timeout(Duration::from_secs(5), queue.acquire_slot())
                .await
                .unwrap();
        });
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.metrics().drain_loops_started, 2);
    }

    #[test]
    fn test_try_with_config_rejects_invalid() {
        let result = RequestQueue::try_with_config(QueueConfig::per_minute(0));
        assert_eq!(result.unwrap_err(), ConfigError::ZeroRequestsPerMinute);
    }

    #[test]
    #[should_panic(expected = "Invalid request queue configuration")]
    fn test_with_config_panics_on_invalid() {
        let _ = RequestQueue::with_config(QueueConfig::per_minute(0));
    }

    #[test]
    fn test_debug_impl() {
        let queue = RequestQueue::new();
        let debug_str = format!("{:?}", queue);
        assert!(debug_str.contains("RequestQueue"));
        assert!(debug_str.contains("max_requests_per_minute: 28"));
    }
}
