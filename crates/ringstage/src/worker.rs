//! Worker threads and their wake protocol.
//!
//! Each worker owns one dedicated thread. The [`WorkerSignal`] state machine
//! makes `wake()` idempotent and cheap:
//!
//! ```text
//!            wake()                  begin()
//!   IDLE ───────────────► PENDING ─────────────► RUNNING
//!    ▲     (unpark)                                 │  │
//!    │                     wake() (no unpark)       │  │
//!    │              RUNNING|PENDING ◄───────────────┘  │
//!    │                     │ begin() (re-arm)          │
//!    │                     └──────► RUNNING            │
//!    └──────────────────── try_idle() ◄────────────────┘
//! ```
//!
//! Only an idle worker is unparked. A wake that lands while the worker runs
//! just sets the PENDING bit, which makes the worker's `try_idle()` fail and
//! the drain loop run again. Since the drain loop only ever executes on the
//! worker's own thread, two executions of the same worker cannot overlap.

use crossbeam_utils::sync::{Parker, Unparker};
use log::{debug, trace};
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const PENDING: u8 = 2;

/// Wake state of one worker, shared between the worker and its wakers.
pub(crate) struct WorkerSignal {
    state: AtomicU8,
    unparker: Unparker,
}

impl WorkerSignal {
    pub(crate) fn new(unparker: Unparker) -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            unparker,
        }
    }

    /// Requests a drain. Returns `true` if the worker had to be unparked.
    #[inline]
    pub(crate) fn wake(&self) -> bool {
        let prev = self.state.fetch_or(PENDING, Ordering::AcqRel);
        if prev == IDLE {
            self.unparker.unpark();
            true
        } else {
            false
        }
    }

    /// Unparks the worker unconditionally so it can observe shutdown.
    pub(crate) fn interrupt(&self) {
        self.unparker.unpark();
    }

    #[inline]
    fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) & PENDING != 0
    }

    /// Consumes a pending wake and marks the worker running.
    ///
    /// The swap reads the waker's `fetch_or`, so everything the waker
    /// published before waking is visible to the drain that follows.
    #[inline]
    fn begin(&self) {
        self.state.swap(RUNNING, Ordering::AcqRel);
    }

    /// Goes idle unless a wake arrived while running.
    #[inline]
    fn try_idle(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Short diagnostic name of the current state.
    pub(crate) fn describe(&self) -> &'static str {
        match self.state.load(Ordering::Relaxed) {
            IDLE => "idle",
            RUNNING => "running",
            PENDING => "pending",
            _ => "running+pending",
        }
    }
}

/// The work a worker thread drives.
pub(crate) trait Drain: Send {
    /// The signal wakers use for this worker.
    fn signal(&self) -> &WorkerSignal;

    /// Whether the owning queue was closed.
    fn is_closed(&self) -> bool;

    /// Whether there is anything to drain right now.
    fn has_work(&self) -> bool;

    /// Drains until caught up (or closed).
    fn drain(&mut self);

    /// Called before the worker parks.
    fn on_idle(&mut self);
}

/// Spawns a named thread driving `drain`.
pub(crate) fn spawn<D>(
    name: String,
    drain: D,
    parker: Parker,
    park_timeout: Duration,
) -> std::io::Result<JoinHandle<()>>
where
    D: Drain + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(move || run(drain, &parker, park_timeout))
}

fn run<D: Drain>(mut drain: D, parker: &Parker, park_timeout: Duration) {
    debug!("worker {:?} started", thread::current().name());
    'outer: loop {
        while !drain.signal().is_pending() {
            if drain.is_closed() {
                break 'outer;
            }
            // Re-arm on work that arrived after the last drain, or that a
            // wake raced past.
            if drain.has_work() {
                drain.signal().wake();
                break;
            }
            drain.on_idle();
            parker.park_timeout(park_timeout);
        }
        if drain.is_closed() {
            break;
        }

        drain.signal().begin();
        loop {
            drain.drain();
            if drain.is_closed() {
                break 'outer;
            }
            if drain.signal().try_idle() {
                break;
            }
            trace!("worker {:?} re-armed by concurrent wake", thread::current().name());
            drain.signal().begin();
        }
    }
    debug!("worker {:?} stopped", thread::current().name());
}
