use crate::config::QueueConfig;
use crate::error::BuildError;
use crate::metrics::MetricsSnapshot;
use crate::processor::Processor;
use crate::ring::{OfferSlot, RingBuffer};
use crate::stage::StageConsumer;
use crate::worker;
use crossbeam_utils::sync::Parker;
use log::debug;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Multi-stage pipeline over a pre-allocated ring of `T` slots.
///
/// Producers claim a slot, fill it in place and publish it. Each stage runs on
/// its own thread and sees every item after the previous stage is done with
/// it, in publish order. A slot is reusable once the last stage has passed it.
///
/// # Example
///
/// ```
/// use ringstage::{from_fn, ProcessResult, QueueConfig, RingQueue};
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::sync::Arc;
///
/// let sum = Arc::new(AtomicU64::new(0));
/// let total = Arc::clone(&sum);
///
/// let queue = RingQueue::<u64>::builder(QueueConfig::new(64))
///     .stage(from_fn(|item: &mut u64| -> ProcessResult {
///         *item *= 2;
///         Ok(())
///     }))
///     .stage(from_fn(move |item: &mut u64| -> ProcessResult {
///         total.fetch_add(*item, Ordering::Relaxed);
///         Ok(())
///     }))
///     .build()
///     .unwrap();
///
/// for i in 1..=3 {
///     let mut slot = queue.start_offer(true).unwrap();
///     *slot = i;
///     queue.finish_offer(slot);
/// }
///
/// while !queue.is_empty() {
///     std::thread::yield_now();
/// }
/// assert_eq!(sum.load(Ordering::Relaxed), 12);
/// ```
pub struct RingQueue<T> {
    ring: Arc<RingBuffer<T>>,
    workers: Vec<JoinHandle<()>>,
}

/// Collects the stages of a [`RingQueue`] before any thread is started.
pub struct RingQueueBuilder<T> {
    config: QueueConfig,
    stages: Vec<Box<dyn Processor<T>>>,
}

impl<T: Send + 'static> RingQueueBuilder<T> {
    /// Appends a stage. Stages see items in the order they were added.
    pub fn stage<P>(mut self, processor: P) -> Self
    where
        P: Processor<T> + 'static,
    {
        self.stages.push(Box::new(processor));
        self
    }

    /// Replaces the configuration.
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the queue with default-initialized slots.
    pub fn build(self) -> Result<RingQueue<T>, BuildError>
    where
        T: Default,
    {
        self.build_with(|_| T::default())
    }

    /// Builds the queue, creating each slot payload with `factory(index)`.
    ///
    /// Fails on an empty stage list, an invalid capacity, or when a worker
    /// thread cannot be spawned. Nothing is left running on failure.
    pub fn build_with<F>(self, factory: F) -> Result<RingQueue<T>, BuildError>
    where
        F: FnMut(usize) -> T,
    {
        if self.stages.is_empty() {
            return Err(BuildError::NoStages);
        }

        let parkers: Vec<Parker> = self.stages.iter().map(|_| Parker::new()).collect();
        let unparkers = parkers.iter().map(|p| p.unparker().clone()).collect();
        let ring = Arc::new(RingBuffer::new(&self.config, unparkers, factory)?);

        let mut queue = RingQueue {
            ring,
            workers: Vec::with_capacity(parkers.len()),
        };
        for (stage, (processor, parker)) in self.stages.into_iter().zip(parkers).enumerate() {
            let consumer = StageConsumer::new(Arc::clone(&queue.ring), stage, processor);
            // On error `queue` is dropped, which stops the stages already running.
            let handle = worker::spawn(
                format!("{}-stage-{}", self.config.thread_name, stage),
                consumer,
                parker,
                self.config.park_timeout,
            )?;
            queue.workers.push(handle);
        }

        debug!(
            "started {} with capacity {} and {} stages",
            self.config.thread_name,
            queue.ring.capacity(),
            queue.workers.len()
        );
        Ok(queue)
    }
}

impl<T: Send + 'static> RingQueue<T> {
    /// Starts building a queue with the given configuration.
    pub fn builder(config: QueueConfig) -> RingQueueBuilder<T> {
        RingQueueBuilder {
            config,
            stages: Vec::new(),
        }
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Claims the next free slot.
    ///
    /// Returns `None` if the ring is full and `wait` is `false`, if it stays
    /// full for the configured offer timeout, or if the queue is closed.
    #[inline]
    pub fn start_offer(&self, wait: bool) -> Option<OfferSlot<'_, T>> {
        self.ring.start_offer(wait)
    }

    /// Publishes a slot obtained from [`start_offer`](Self::start_offer).
    ///
    /// The slot becomes visible to the first stage once every earlier claim
    /// is published too.
    #[inline]
    pub fn finish_offer(&self, slot: OfferSlot<'_, T>) {
        debug_assert!(slot.belongs_to(&self.ring), "slot belongs to another queue");
        slot.finish();
    }

    /// Claims a slot, fills it with `fill` and publishes it.
    ///
    /// Returns `false` if no slot could be claimed.
    pub fn offer_with<F>(&self, wait: bool, fill: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.ring.start_offer(wait) {
            Some(mut slot) => {
                fill(&mut slot);
                slot.finish();
                true
            }
            None => false,
        }
    }

    // ---------------------------------------------------------------------
    // INTROSPECTION
    // ---------------------------------------------------------------------

    /// Returns `true` if every claimed slot has passed the last stage.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of claimed slots the last stage has not released yet.
    #[inline]
    pub fn size(&self) -> usize {
        self.ring.size()
    }

    /// Number of slots that can be claimed right now.
    #[inline]
    pub fn available(&self) -> usize {
        self.ring.available()
    }

    /// Ring size after rounding.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Sequence number the next claim will take.
    #[inline]
    pub fn claimed(&self) -> u64 {
        self.ring.claimed()
    }

    /// Exclusive upper bound of the published prefix. Never exceeds
    /// [`claimed`](Self::claimed).
    #[inline]
    pub fn published(&self) -> u64 {
        self.ring.published()
    }

    /// Number of pipeline stages.
    #[inline]
    pub fn stage_count(&self) -> usize {
        self.ring.stage_count()
    }

    /// Diagnostic snapshot of counters and per-stage worker states.
    pub fn worker_state(&self) -> String {
        self.ring.describe()
    }

    /// Configuration the queue was built with.
    pub fn config(&self) -> &QueueConfig {
        self.ring.config()
    }

    /// Metrics snapshot (all zeros unless enabled in the configuration).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.ring.metrics()
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    /// Forwards any finished-but-unpublished slots and wakes the first stage.
    pub fn wake(&self) {
        self.ring.forward_publish();
        self.ring.wake_stage(0);
    }

    /// Stops accepting offers and stops the stage workers.
    ///
    /// Best effort: items still in the ring are not processed. Stage threads
    /// are joined when the queue is dropped.
    pub fn close(&self) {
        self.ring.close();
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        self.ring.close();
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // A processor dropping the last handle must not join itself.
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
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_build_requires_stage() {
        let result = RingQueue::<u64>::builder(QueueConfig::new(8)).build();
        assert!(matches!(result, Err(BuildError::NoStages)));
    }

    #[test]
    fn test_build_rejects_zero_capacity() {
        let result = RingQueue::<u64>::builder(QueueConfig::new(0))
            .stage(from_fn(|_: &mut u64| -> ProcessResult { Ok(()) }))
            .build();
        assert!(matches!(result, Err(BuildError::ZeroCapacity)));
    }

    #[test]
    fn test_build_rejects_oversized_initial_sequence() {
        let result = RingQueue::<u64>::builder(
            QueueConfig::new(8).with_initial_sequence(crate::config::MAX_INITIAL_SEQUENCE + 1),
        )
        .stage(from_fn(|_: &mut u64| -> ProcessResult { Ok(()) }))
        .build();
        assert!(matches!(
            result,
            Err(BuildError::InitialSequenceTooLarge { .. })
        ));
    }

    #[test]
    fn test_capacity_rounded() {
        let queue = RingQueue::<u64>::builder(QueueConfig::new(5))
            .stage(from_fn(|_: &mut u64| -> ProcessResult { Ok(()) }))
            .build()
            .unwrap();
        assert_eq!(queue.capacity(), 8);
        assert_eq!(queue.available(), 8);
        assert!(queue.is_empty());
        assert_eq!(queue.stage_count(), 1);
    }

    #[test]
    fn test_offer_with_reaches_stage() {
        let seen = Arc::new(AtomicU64::new(0));
        let s = Arc::clone(&seen);
        let queue = RingQueue::<u64>::builder(QueueConfig::new(16))
            .stage(from_fn(move |item: &mut u64| -> ProcessResult {
                s.fetch_add(*item, Ordering::Relaxed);
                Ok(())
            }))
            .build()
            .unwrap();

        for i in 1..=10 {
            assert!(queue.offer_with(true, |slot| *slot = i));
        }
        wait_until(|| seen.load(Ordering::Relaxed) == 55);
        wait_until(|| queue.is_empty());
        assert_eq!(queue.claimed(), 10);
        assert_eq!(queue.published(), 10);
    }

    #[test]
    fn test_build_with_factory() {
        let queue = RingQueue::<Vec<u8>>::builder(QueueConfig::new(8))
            .stage(from_fn(|buf: &mut Vec<u8>| -> ProcessResult {
                buf.clear();
                Ok(())
            }))
            .build_with(|_| Vec::with_capacity(256))
            .unwrap();

        let mut slot = queue.start_offer(false).unwrap();
        assert!(slot.capacity() >= 256);
        slot.extend_from_slice(b"hello");
        queue.finish_offer(slot);
        wait_until(|| queue.is_empty());
    }

    #[test]
    fn test_close_rejects_offers() {
        let queue = RingQueue::<u64>::builder(QueueConfig::new(8))
            .stage(from_fn(|_: &mut u64| -> ProcessResult { Ok(()) }))
            .build()
            .unwrap();
        queue.close();
        assert!(queue.is_closed());
        assert!(queue.start_offer(true).is_none());
        assert!(!queue.offer_with(false, |_| {}));
    }

    #[test]
    fn test_worker_state_reports_stages() {
        let queue = RingQueue::<u64>::builder(QueueConfig::new(8).with_thread_name("diag"))
            .stage(from_fn(|_: &mut u64| -> ProcessResult { Ok(()) }))
            .stage(from_fn(|_: &mut u64| -> ProcessResult { Ok(()) }))
            .build()
            .unwrap();
        let state = queue.worker_state();
        assert!(state.starts_with("diag[capacity=8"), "{state}");
        assert!(state.contains("stages=["), "{state}");
    }

    #[test]
    fn test_metrics_counted_when_enabled() {
        let queue = RingQueue::<u64>::builder(QueueConfig::new(8).with_metrics(true))
            .stage(from_fn(|item: &mut u64| -> ProcessResult {
                if *item == 3 {
                    Err("three".into())
                } else {
                    Ok(())
                }
            }))
            .build()
            .unwrap();

        for i in 0..5 {
            assert!(queue.offer_with(true, |slot| *slot = i));
        }
        wait_until(|| queue.metrics().items_processed == 5);

        let metrics = queue.metrics();
        assert_eq!(metrics.items_offered, 5);
        assert_eq!(metrics.process_failures, 1);
        assert!(metrics.batches_completed >= 1);
    }
}
