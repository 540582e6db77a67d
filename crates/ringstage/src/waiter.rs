use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// The one wait/notify pair of a queue: producers blocked on a full queue.
///
/// Consumers call [`notify`](Self::notify) after freeing capacity. It costs a
/// single atomic load unless a producer is actually waiting, so the fast path
/// never touches the mutex.
#[derive(Debug, Default)]
pub(crate) struct CapacityWaiter {
    waiting: AtomicUsize,
    lock: Mutex<()>,
    available: Condvar,
}

impl CapacityWaiter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Blocks until `ready()` holds or `timeout` elapses. Returns `ready()`.
    ///
    /// `ready` is evaluated under the lock, so a notification issued after
    /// the condition became true cannot be lost.
    pub(crate) fn wait_until<F>(&self, timeout: Duration, ready: F) -> bool
    where
        F: Fn() -> bool,
    {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .available
            .wait_timeout_while(guard, timeout, |()| !ready())
            .unwrap_or_else(PoisonError::into_inner);
        let result = ready();
        drop(guard);
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Wakes every blocked producer, if there is any.
    pub(crate) fn notify(&self) {
        // Orders the caller's counter store before the `waiting` load.
        fence(Ordering::SeqCst);
        if self.waiting.load(Ordering::SeqCst) == 0 {
            return;
        }
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.available.notify_all();
    }

    /// Number of producers currently blocked.
    pub(crate) fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }
}
