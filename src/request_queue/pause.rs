//! # Manual Pause Gate
//!
//! A process-wide switch the user flips from the UI to hold all outbound
//! catalog traffic. While it is active the drain loop stops granting slots
//! and every wrapped search call blocks before touching the network.
//!
//! ```text
//!     set_paused(true)          set_paused(false)
//!           │                          │
//!           ▼                          ▼
//!     ┌───────────┐  waiters   ┌───────────────┐
//!     │  active   │ ─────────► │ take list,    │──► wake all, each re-checks
//!     └───────────┘  register  │ then resolve  │
//!                              └───────────────┘
//! ```
//!
//! Waking is a hint, not a promise: a woken waiter looks at the gate again
//! and goes back to sleep if someone re-activated it in the meantime.
//!
//! Every real transition is announced to registered [`PauseObserver`]s and
//! to [`subscribe`](PauseGate::subscribe)rs, in the order the transitions
//! happened. Announcements are best effort; a failing observer is logged and
//! skipped.

use super::utils::current_time_ms;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Error type observers report back. Only ever logged.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// A pause state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseEvent {
    /// The new state: `true` when the gate became active.
    pub paused: bool,
    /// When the transition happened, in milliseconds since UNIX epoch.
    pub at_ms: u64,
}

/// Receives pause transitions synchronously, right after the state change.
///
/// Closures of the right shape implement this trait:
///
/// ```rust
/// use rategate::{ObserverError, PauseEvent, PauseGate};
/// use std::sync::Arc;
///
/// let gate = PauseGate::new();
/// gate.add_observer(Arc::new(|event: &PauseEvent| -> Result<(), ObserverError> {
///     println!("matching paused: {}", event.paused);
///     Ok(())
/// }));
/// ```
pub trait PauseObserver: Send + Sync {
    /// Called once per transition. Errors and panics are logged and
    /// otherwise ignored.
    fn on_pause_changed(&self, event: &PauseEvent) -> Result<(), ObserverError>;
}

impl<F> PauseObserver for F
where
    F: Fn(&PauseEvent) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_pause_changed(&self, event: &PauseEvent) -> Result<(), ObserverError> {
        self(event)
    }
}

#[derive(Default)]
struct GateState {
    active: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

/// Broadcastable boolean gate with a waiter list.
///
/// Share it with `Arc`; the [`RequestQueue`](crate::RequestQueue) owns one
/// and hands it out through [`pause_gate`](crate::RequestQueue::pause_gate).
pub struct PauseGate {
    state: Mutex<GateState>,
    // Held from a state change through its announcement. Reentrant so an
    // observer may flip the gate itself.
    transition: ReentrantMutex<()>,
    observers: RwLock<Vec<Arc<dyn PauseObserver>>>,
    events: broadcast::Sender<PauseEvent>,
}

impl PauseGate {
    /// Creates an inactive gate with the default event capacity.
    pub fn new() -> Self {
        Self::with_event_capacity(super::config::DEFAULT_EVENT_CAPACITY)
    }

    /// Creates an inactive gate whose event channel buffers `capacity`
    /// events per subscriber. A capacity of 0 is raised to 1.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Mutex::new(GateState::default()),
            transition: ReentrantMutex::new(()),
            observers: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Current gate state. Never blocks.
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.state.lock().active
    }

    /// Returns once the gate is inactive.
    ///
    /// Returns immediately if the gate is already inactive. Otherwise
    /// registers a waiter, sleeps until the next lift, and checks again.
    pub async fn wait_while_paused(&self) {
        loop {
            let lifted = {
                let mut state = self.state.lock();
                if !state.active {
                    return;
                }
                state.waiters.retain(|waiter| !waiter.is_closed());
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                rx
            };
            // A dropped sender means the list was taken by a lift; either
            // way the gate must be re-checked.
            let _ = lifted.await;
        }
    }

    /// Activates or lifts the gate.
    ///
    /// Activating an active gate does nothing. Lifting takes the whole
    /// waiter list out under the lock before resolving any of it, so a
    /// waiter that immediately re-registers lands in a fresh list.
    ///
    /// Concurrent calls are serialized through their announcements, so the
    /// last event observers and subscribers see always matches the gate.
    pub fn set_paused(&self, paused: bool) {
        let _transition = self.transition.lock();
        let released = {
            let mut state = self.state.lock();
            if state.active == paused {
                debug!(paused, "Pause state unchanged");
                return;
            }
            state.active = paused;
            if paused {
                Vec::new()
            } else {
                std::mem::take(&mut state.waiters)
            }
        };

        let count = released.len();
        for waiter in released {
            let _ = waiter.send(());
        }

        if paused {
            info!("Manual pause activated");
        } else {
            info!("Manual pause lifted, released {} waiters", count);
        }

        self.announce(PauseEvent {
            paused,
            at_ms: current_time_ms(),
        });
    }

    /// Registers an observer for future transitions.
    pub fn add_observer(&self, observer: Arc<dyn PauseObserver>) {
        self.observers.write().push(observer);
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Subscribes to transitions as a stream of [`PauseEvent`]s.
    ///
    /// Only transitions after this call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<PauseEvent> {
        self.events.subscribe()
    }

    /// Callers currently registered as blocked on the gate.
    pub fn waiter_count(&self) -> usize {
        self.state
            .lock()
            .waiters
            .iter()
            .filter(|waiter| !waiter.is_closed())
            .count()
    }

    // Subscribers first: an observer that flips the gate announces its own
    // transition from inside this call.
    fn announce(&self, event: PauseEvent) {
        if self.events.send(event).is_err() {
            debug!("No pause event subscribers");
        }

        let observers = self.observers.read().clone();
        for observer in &observers {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_pause_changed(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("Pause observer failed: {}", err),
                Err(_) => warn!("Pause observer panicked"),
            }
        }
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PauseGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PauseGate")
            .field("paused", &self.is_paused())
            .field("waiters", &self.waiter_count())
            .field("observers", &self.observer_count())
            .finish()
    }
}
