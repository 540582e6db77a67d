use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters shared by producers and workers.
///
/// Only updated when metrics are enabled in the queue configuration.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    items_offered: AtomicU64,
    offers_rejected: AtomicU64,
    offer_waits: AtomicU64,
    items_processed: AtomicU64,
    process_failures: AtomicU64,
    batches_completed: AtomicU64,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_offered(&self, n: u64) {
        self.items_offered.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_rejected(&self, n: u64) {
        self.offers_rejected.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_wait(&self) {
        self.offer_waits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_processed(&self, n: u64) {
        self.items_processed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_failures(&self, n: u64) {
        self.process_failures.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_batch(&self) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_offered: self.items_offered.load(Ordering::Relaxed),
            offers_rejected: self.offers_rejected.load(Ordering::Relaxed),
            offer_waits: self.offer_waits.load(Ordering::Relaxed),
            items_processed: self.items_processed.load(Ordering::Relaxed),
            process_failures: self.process_failures.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of queue metrics.
///
/// All fields are zero when metrics are disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Items successfully published by producers.
    pub items_offered: u64,
    /// Offers that found no capacity (non-blocking or timed out).
    pub offers_rejected: u64,
    /// Times a producer blocked waiting for capacity.
    pub offer_waits: u64,
    /// Items handed to a processor, summed over all stages or workers.
    pub items_processed: u64,
    /// Item callbacks that returned an error or panicked.
    pub process_failures: u64,
    /// Drained batches (one per `on_process_complete`).
    pub batches_completed: u64,
}
