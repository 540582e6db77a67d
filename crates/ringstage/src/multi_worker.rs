//! Fan-out variant: one shared bounded queue drained by several workers.
//!
//! There is no stage chain and no ordering guarantee between values. Each
//! offer wakes only as many workers as the backlog justifies (see
//! [`wake_count`]), so a trickle of values keeps one worker busy instead of
//! bouncing every worker awake.

use crate::config::MultiWorkerConfig;
use crate::error::BuildError;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::processor::{guarded, ValueProcessor};
use crate::waiter::CapacityWaiter;
use crate::worker::{self, Drain, WorkerSignal};
use crossbeam_queue::ArrayQueue;
use crossbeam_utils::sync::Parker;
use log::{debug, trace};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Number of workers to signal for a backlog of `backlog` values.
///
/// One worker per started `offset` values, at most `workers`. An empty
/// backlog wakes nobody.
///
/// ```
/// use ringstage::wake_count;
///
/// assert_eq!(wake_count(0, 16, 4), 0);
/// assert_eq!(wake_count(1, 16, 4), 1);
/// assert_eq!(wake_count(17, 16, 4), 2);
/// assert_eq!(wake_count(1_000, 16, 4), 4);
/// ```
pub fn wake_count(backlog: usize, offset: usize, workers: usize) -> usize {
    if backlog == 0 {
        return 0;
    }
    backlog.div_ceil(offset.max(1)).min(workers)
}

/// State shared by producers and workers.
struct FanOut<V> {
    queue: ArrayQueue<V>,
    signals: Box<[WorkerSignal]>,
    cursor: AtomicUsize,
    waiter: CapacityWaiter,
    closed: AtomicBool,
    metrics: Metrics,
    config: MultiWorkerConfig,
}

impl<V> FanOut<V> {
    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Signals workers round-robin in proportion to the backlog.
    fn wake(&self) -> usize {
        let workers = self.signals.len();
        let n = wake_count(self.queue.len(), self.config.wake_offset, workers);
        for _ in 0..n {
            let next = self.cursor.fetch_add(1, Ordering::Relaxed) % workers;
            if self.signals[next].wake() {
                trace!("{}: unparked worker {next}", self.config.thread_name);
            }
        }
        n
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing {} with backlog {}", self.config.thread_name, self.queue.len());
        for signal in self.signals.iter() {
            signal.interrupt();
        }
        self.waiter.notify();
    }

    fn describe(&self) -> String {
        let mut out = format!(
            "{}[capacity={}, backlog={}, workers=[",
            self.config.thread_name,
            self.queue.capacity(),
            self.queue.len()
        );
        for (i, signal) in self.signals.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(signal.describe());
        }
        let _ = write!(
            out,
            "], waiting_producers={}, closed={}]",
            self.waiter.waiting(),
            self.is_closed()
        );
        out
    }
}

/// One worker of the fan-out: pops values until the queue is empty.
struct FanOutWorker<V> {
    fan: Arc<FanOut<V>>,
    index: usize,
    busy: bool,
    processor: Box<dyn ValueProcessor<V>>,
}

impl<V: Send> Drain for FanOutWorker<V> {
    fn signal(&self) -> &WorkerSignal {
        &self.fan.signals[self.index]
    }

    fn is_closed(&self) -> bool {
        self.fan.is_closed()
    }

    fn has_work(&self) -> bool {
        !self.fan.queue.is_empty()
    }

    fn drain(&mut self) {
        let fan = &*self.fan;
        let index = self.index;
        let mut processed = 0u64;
        let mut failures = 0u64;

        while !fan.is_closed() {
            let Some(value) = fan.queue.pop() else {
                break;
            };
            fan.waiter.notify();

            if !self.busy {
                self.busy = true;
                guarded("worker", index, "on_process_start", || {
                    self.processor.on_process_start()
                });
            }
            if !guarded("worker", index, "process", || self.processor.process(value)) {
                failures += 1;
            }
            processed += 1;
        }

        if processed > 0 {
            guarded("worker", index, "on_process_complete", || {
                self.processor.on_process_complete()
            });
            if fan.config.enable_metrics {
                fan.metrics.add_processed(processed);
                fan.metrics.add_failures(failures);
                fan.metrics.add_batch();
            }
        }
    }

    fn on_idle(&mut self) {
        self.busy = false;
    }
}

/// Bounded queue of owned values drained by a pool of workers.
///
/// Trades ordering for parallelism: values are handed out in FIFO order but
/// processed concurrently, so completion order is arbitrary.
///
/// ```
/// use ringstage::{from_fn, MultiWorkerConfig, MultiWorkerQueue, ProcessResult};
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::sync::Arc;
///
/// let total = Arc::new(AtomicU64::new(0));
/// let queue = MultiWorkerQueue::<u64>::new(MultiWorkerConfig::new(64, 2), |_| {
///     let total = Arc::clone(&total);
///     from_fn(move |v: u64| -> ProcessResult {
///         total.fetch_add(v, Ordering::Relaxed);
///         Ok(())
///     })
/// })
/// .unwrap();
///
/// for v in 1..=10 {
///     queue.offer(v).unwrap();
/// }
/// while total.load(Ordering::Relaxed) < 55 {
///     std::thread::yield_now();
/// }
/// ```
pub struct MultiWorkerQueue<V> {
    fan: Arc<FanOut<V>>,
    workers: Vec<JoinHandle<()>>,
}

impl<V: Send + 'static> MultiWorkerQueue<V> {
    /// Starts `config.workers` threads, each with the processor returned by
    /// `factory(worker_index)`.
    pub fn new<P, F>(config: MultiWorkerConfig, mut factory: F) -> Result<Self, BuildError>
    where
        P: ValueProcessor<V> + 'static,
        F: FnMut(usize) -> P,
    {
        config.validate()?;

        let parkers: Vec<Parker> = (0..config.workers).map(|_| Parker::new()).collect();
        let signals = parkers
            .iter()
            .map(|p| WorkerSignal::new(p.unparker().clone()))
            .collect();
        let fan = Arc::new(FanOut {
            queue: ArrayQueue::new(config.capacity),
            signals,
            cursor: AtomicUsize::new(0),
            waiter: CapacityWaiter::new(),
            closed: AtomicBool::new(false),
            metrics: Metrics::new(),
            config,
        });

        let mut queue = Self {
            fan,
            workers: Vec::with_capacity(parkers.len()),
        };
        for (index, parker) in parkers.into_iter().enumerate() {
            let worker = FanOutWorker {
                fan: Arc::clone(&queue.fan),
                index,
                busy: false,
                processor: Box::new(factory(index)),
            };
            // On error `queue` is dropped, which stops the workers already running.
            let handle = worker::spawn(
                format!("{}-{}", queue.fan.config.thread_name, index),
                worker,
                parker,
                queue.fan.config.park_timeout,
            )?;
            queue.workers.push(handle);
        }

        debug!(
            "started {} with capacity {} and {} workers",
            queue.fan.config.thread_name,
            queue.fan.queue.capacity(),
            queue.workers.len()
        );
        Ok(queue)
    }

    /// Offers a value, waiting for capacity up to the configured timeout.
    ///
    /// Returns the value back if it could not be enqueued.
    pub fn offer(&self, value: V) -> Result<(), V> {
        self.offer_with(value, true)
    }

    /// Offers a value without waiting.
    pub fn try_offer(&self, value: V) -> Result<(), V> {
        self.offer_with(value, false)
    }

    /// Enqueues `value` and wakes workers for the new backlog.
    ///
    /// When the queue is full and `wait` is set, blocks until a worker frees
    /// a place, the queue is closed, or the offer timeout elapses.
    pub fn offer_with(&self, value: V, wait: bool) -> Result<(), V> {
        let fan = &*self.fan;
        let mut value = value;
        let mut deadline = None;

        loop {
            if fan.is_closed() {
                return Err(self.reject(value));
            }
            match fan.queue.push(value) {
                Ok(()) => {
                    if fan.config.enable_metrics {
                        fan.metrics.add_offered(1);
                    }
                    fan.wake();
                    return Ok(());
                }
                Err(rejected) => value = rejected,
            }

            // Full: make sure the backlog is being worked on.
            fan.wake();
            if !wait {
                return Err(self.reject(value));
            }

            let deadline =
                *deadline.get_or_insert_with(|| Instant::now() + fan.config.offer_timeout);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.reject(value));
            }
            if fan.config.enable_metrics {
                fan.metrics.add_wait();
            }
            fan.waiter
                .wait_until(remaining, || fan.is_closed() || !fan.queue.is_full());
        }
    }

    fn reject(&self, value: V) -> V {
        if self.fan.config.enable_metrics {
            self.fan.metrics.add_rejected(1);
        }
        value
    }

    /// Returns `true` if no value is waiting to be picked up.
    ///
    /// Values already handed to a worker are not counted.
    pub fn is_empty(&self) -> bool {
        self.fan.queue.is_empty()
    }

    /// Values waiting to be picked up by a worker.
    pub fn size(&self) -> usize {
        self.fan.queue.len()
    }

    /// Values that can be offered right now without waiting.
    pub fn available(&self) -> usize {
        self.fan.queue.capacity() - self.fan.queue.len().min(self.fan.queue.capacity())
    }

    /// Queue capacity, exactly as configured.
    pub fn capacity(&self) -> usize {
        self.fan.queue.capacity()
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.fan.signals.len()
    }

    /// Diagnostic snapshot of the backlog and per-worker states.
    pub fn worker_state(&self) -> String {
        self.fan.describe()
    }

    /// Configuration the queue was built with.
    pub fn config(&self) -> &MultiWorkerConfig {
        &self.fan.config
    }

    /// Metrics snapshot (all zeros unless enabled in the configuration).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.fan.metrics.snapshot()
    }

    /// Wakes workers in proportion to the current backlog. Returns how many
    /// were signaled.
    pub fn wake(&self) -> usize {
        self.fan.wake()
    }

    /// Stops accepting values and stops the workers.
    ///
    /// Values still queued are dropped with the queue.
    pub fn close(&self) {
        self.fan.close();
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.fan.is_closed()
    }
}

impl<V> Drop for MultiWorkerQueue<V> {
    fn drop(&mut self) {
        self.fan.close();
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessResult;
    use crate::processor::from_fn;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;
    use std::time::Duration;

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_wake_count() {
        assert_eq!(wake_count(0, 16, 4), 0);
        assert_eq!(wake_count(1, 16, 4), 1);
        assert_eq!(wake_count(16, 16, 4), 1);
        assert_eq!(wake_count(17, 16, 4), 2);
        assert_eq!(wake_count(64, 16, 4), 4);
        assert_eq!(wake_count(1_000, 16, 4), 4);
        assert_eq!(wake_count(5, 1, 8), 5);
    }

    #[test]
    fn test_new_validates_config() {
        let noop = |_| from_fn(|_: u32| -> ProcessResult { Ok(()) });
        assert!(matches!(
            MultiWorkerQueue::<u32>::new(MultiWorkerConfig::new(0, 2), noop),
            Err(BuildError::ZeroCapacity)
        ));
        assert!(matches!(
            MultiWorkerQueue::<u32>::new(MultiWorkerConfig::new(8, 0), noop),
            Err(BuildError::NoWorkers)
        ));
        assert!(matches!(
            MultiWorkerQueue::<u32>::new(MultiWorkerConfig::new(8, 2).with_wake_offset(0), noop),
            Err(BuildError::ZeroWakeOffset)
        ));
    }

    #[test]
    fn test_capacity_not_rounded() {
        let queue = MultiWorkerQueue::<u32>::new(MultiWorkerConfig::new(5, 1), |_| {
            from_fn(|_: u32| -> ProcessResult { Ok(()) })
        })
        .unwrap();
        assert_eq!(queue.capacity(), 5);
        assert_eq!(queue.available(), 5);
        assert_eq!(queue.worker_count(), 1);
        assert_eq!(queue.wake(), 0);
    }

    #[test]
    fn test_every_value_processed_once() {
        let sum = Arc::new(AtomicU64::new(0));
        let count = Arc::new(AtomicU64::new(0));
        let config = MultiWorkerConfig::new(32, 4).with_wake_offset(4);
        let queue = MultiWorkerQueue::<u64>::new(config, |_| {
            let sum = Arc::clone(&sum);
            let count = Arc::clone(&count);
            from_fn(move |v: u64| -> ProcessResult {
                sum.fetch_add(v, Ordering::Relaxed);
                count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        })
        .unwrap();

        for v in 1..=1_000 {
            queue.offer(v).unwrap();
        }
        wait_until(|| count.load(Ordering::Relaxed) == 1_000);
        assert_eq!(sum.load(Ordering::Relaxed), 500_500);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_returns_value() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let config = MultiWorkerConfig::new(2, 1)
            .with_offer_timeout(Duration::from_millis(20))
            .with_metrics(true);
        let queue = MultiWorkerQueue::<u32>::new(config, |_| {
            let g = Arc::clone(&gate);
            from_fn(move |_: u32| -> ProcessResult {
                drop(g.lock().unwrap());
                Ok(())
            })
        })
        .unwrap();

        // The worker takes the first value and blocks on the gate.
        queue.offer(0).unwrap();
        wait_until(|| queue.is_empty());

        assert_eq!(queue.try_offer(1), Ok(()));
        assert_eq!(queue.try_offer(2), Ok(()));
        assert_eq!(queue.available(), 0);
        assert_eq!(queue.try_offer(3), Err(3));
        assert_eq!(queue.offer(4), Err(4));

        let metrics = queue.metrics();
        assert_eq!(metrics.items_offered, 3);
        assert_eq!(metrics.offers_rejected, 2);
        assert!(metrics.offer_waits >= 1);

        drop(held);
        wait_until(|| queue.metrics().items_processed == 3);
    }

    #[test]
    fn test_blocked_offer_resumes_when_worker_frees_space() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let queue = Arc::new(
            MultiWorkerQueue::<u32>::new(MultiWorkerConfig::new(1, 1), |_| {
                let g = Arc::clone(&gate);
                from_fn(move |_: u32| -> ProcessResult {
                    drop(g.lock().unwrap());
                    Ok(())
                })
            })
            .unwrap(),
        );

        queue.offer(0).unwrap();
        wait_until(|| queue.is_empty());
        queue.offer(1).unwrap();

        let q = Arc::clone(&queue);
        let producer = thread::spawn(move || q.offer(2));
        wait_until(|| queue.worker_state().contains("waiting_producers=1"));

        drop(held);
        assert_eq!(producer.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_hooks_wrap_each_busy_period() {
        let events = Arc::new(Mutex::new(Vec::new()));

        struct Hooked {
            events: Arc<Mutex<Vec<String>>>,
        }
        impl ValueProcessor<u32> for Hooked {
            fn on_process_start(&mut self) -> ProcessResult {
                self.events.lock().unwrap().push("start".into());
                Ok(())
            }
            fn process(&mut self, value: u32) -> ProcessResult {
                self.events.lock().unwrap().push(value.to_string());
                Ok(())
            }
            fn on_process_complete(&mut self) -> ProcessResult {
                self.events.lock().unwrap().push("complete".into());
                Ok(())
            }
        }

        let queue = MultiWorkerQueue::<u32>::new(MultiWorkerConfig::new(8, 1), |_| Hooked {
            events: Arc::clone(&events),
        })
        .unwrap();

        queue.offer(7).unwrap();
        wait_until(|| events.lock().unwrap().len() == 3);
        assert_eq!(*events.lock().unwrap(), ["start", "7", "complete"]);
    }

    #[test]
    fn test_close_rejects_offers() {
        let queue = MultiWorkerQueue::<u32>::new(
            MultiWorkerConfig::new(4, 2).with_thread_name("fan"),
            |_| from_fn(|_: u32| -> ProcessResult { Ok(()) }),
        )
        .unwrap();
        assert!(queue.worker_state().starts_with("fan[capacity=4, backlog=0"));

        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.offer(9), Err(9));
        assert!(queue.worker_state().ends_with("closed=true]"));
    }
}
