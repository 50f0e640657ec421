//! # Queue State
//!
//! Bookkeeping for the drain loop: the FIFO of pending slots, the time of
//! the last grant and whether a drain loop is running. Every accessor takes
//! the lock once and never holds it across an `.await`, so each call is
//! atomic with respect to the others.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// One caller's reservation in the queue.
///
/// Granted at most once; [`grant`](Self::grant) consumes the slot.
#[derive(Debug)]
pub(crate) struct RequestSlot {
    id: u64,
    grant_tx: oneshot::Sender<()>,
}

impl RequestSlot {
    /// Creates a slot and the receiver its caller waits on.
    pub(crate) fn new(id: u64) -> (Self, oneshot::Receiver<()>) {
        let (grant_tx, grant_rx) = oneshot::channel();
        (Self { id, grant_tx }, grant_rx)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Releases the waiting caller. Returns `false` if nobody is listening
    /// any more, in which case the grant is a no-op.
    pub(crate) fn grant(self) -> bool {
        self.grant_tx.send(()).is_ok()
    }
}

#[derive(Debug, Default)]
struct StateInner {
    pending: VecDeque<RequestSlot>,
    last_grant: Option<Instant>,
    processing: bool,
}

/// Pending slots, last grant time and the processing flag.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    inner: Mutex<StateInner>,
}

impl QueueState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Removes the head slot, if any.
    pub(crate) fn pop_front(&self) -> Option<RequestSlot> {
        self.inner.lock().pending.pop_front()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// `None` until the first grant.
    pub(crate) fn last_grant_time(&self) -> Option<Instant> {
        self.inner.lock().last_grant
    }

    pub(crate) fn set_last_grant_time(&self, at: Instant) {
        self.inner.lock().last_grant = Some(at);
    }

    pub(crate) fn is_processing(&self) -> bool {
        self.inner.lock().processing
    }

    /// Appends `slot` and claims the processing flag if it was clear.
    ///
    /// Returns `true` when the caller is now responsible for starting the
    /// drain loop. At most one caller sees `true` until the loop finishes.
    pub(crate) fn enqueue(&self, slot: RequestSlot) -> bool {
        let mut inner = self.inner.lock();
        inner.pending.push_back(slot);
        if inner.processing {
            false
        } else {
            inner.processing = true;
            true
        }
    }

    /// Clears the processing flag if, and only if, nothing is pending.
    ///
    /// Returns `true` when the drain loop should exit. Checking emptiness
    /// and clearing the flag under one lock means a concurrent
    /// [`enqueue`](Self::enqueue) either lands before the check (and keeps
    /// this loop alive) or after it (and starts a fresh loop).
    pub(crate) fn finish_if_idle(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() {
            inner.processing = false;
            true
        } else {
            false
        }
    }

    /// Clears the processing flag unconditionally and returns how many
    /// slots are still pending. For a drain loop that ends without reaching
    /// [`finish_if_idle`](Self::finish_if_idle); the next
    /// [`enqueue`](Self::enqueue) claims the flag again and serves them.
    pub(crate) fn release_processing(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.processing = false;
        inner.pending.len()
    }
}
