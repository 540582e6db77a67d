use crate::config::QueueConfig;
use crate::error::{BuildError, ProcessResult};
use crate::metrics::MetricsSnapshot;
use crate::processor::{Processor, ValueProcessor};
use crate::queue::RingQueue;
use crate::slot::ValueSlot;

/// Single-stage queue of owned values.
///
/// Each value is moved into a pre-allocated [`ValueSlot`] and moved out again
/// before it reaches the processor, so the ring never holds on to a payload
/// after it has been processed.
///
/// ```
/// use ringstage::{from_fn, ProcessResult, ValueQueue};
/// use std::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel();
/// let queue = ValueQueue::<String>::new(16, from_fn(move |line: String| -> ProcessResult {
///     tx.send(line.len())?;
///     Ok(())
/// }))
/// .unwrap();
///
/// queue.offer("hello".to_string()).unwrap();
/// assert_eq!(rx.recv().unwrap(), 5);
/// ```
pub struct ValueQueue<V> {
    queue: RingQueue<ValueSlot<V>>,
}

/// Stage adapter unwrapping slots for a [`ValueProcessor`].
struct ValueStage<P> {
    inner: P,
}

impl<V, P> Processor<ValueSlot<V>> for ValueStage<P>
where
    P: ValueProcessor<V>,
{
    fn on_process_start(&mut self) -> ProcessResult {
        self.inner.on_process_start()
    }

    fn process(&mut self, slot: &mut ValueSlot<V>) -> ProcessResult {
        match slot.get_and_clear() {
            Some(value) => self.inner.process(value),
            None => Ok(()),
        }
    }

    fn on_process_complete(&mut self) -> ProcessResult {
        self.inner.on_process_complete()
    }
}

impl<V: Send + 'static> ValueQueue<V> {
    /// Creates a queue with the given capacity (rounded up to a power of two).
    pub fn new<P>(capacity: usize, processor: P) -> Result<Self, BuildError>
    where
        P: ValueProcessor<V> + 'static,
    {
        Self::with_config(QueueConfig::new(capacity), processor)
    }

    /// Creates a queue from a full configuration.
    pub fn with_config<P>(config: QueueConfig, processor: P) -> Result<Self, BuildError>
    where
        P: ValueProcessor<V> + 'static,
    {
        let queue = RingQueue::builder(config)
            .stage(ValueStage { inner: processor })
            .build()?;
        Ok(Self { queue })
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

    /// Claims a slot, stores `value` in it and publishes it.
    pub fn offer_with(&self, value: V, wait: bool) -> Result<(), V> {
        match self.queue.start_offer(wait) {
            Some(mut slot) => {
                slot.init(value);
                self.queue.finish_offer(slot);
                Ok(())
            }
            None => Err(value),
        }
    }

    /// Returns `true` if every offered value has been processed.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Values offered but not yet processed.
    pub fn size(&self) -> usize {
        self.queue.size()
    }

    /// Values that can be offered right now without waiting.
    pub fn available(&self) -> usize {
        self.queue.available()
    }

    /// Ring size after rounding.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Diagnostic snapshot of counters and worker state.
    pub fn worker_state(&self) -> String {
        self.queue.worker_state()
    }

    /// Metrics snapshot (all zeros unless enabled in the configuration).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.queue.metrics()
    }

    /// Wakes the processing worker.
    pub fn wake(&self) {
        self.queue.wake();
    }

    /// Stops accepting values; unprocessed values are dropped with the queue.
    pub fn close(&self) {
        self.queue.close();
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}
