use crate::config::QueueConfig;
use crate::error::BuildError;
use crate::invariants::{debug_assert_bounded_count, debug_assert_not_past, debug_assert_not_ready};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::slot::RingSlot;
use crate::waiter::CapacityWaiter;
use crate::worker::WorkerSignal;
use crossbeam_utils::sync::Unparker;
use crossbeam_utils::{Backoff, CachePadded};
use log::{debug, warn};
use std::fmt::Write as _;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

// =============================================================================
// COUNTER PROTOCOL & MEMORY ORDERING
// =============================================================================
//
// All counters are unbounded u64 sequence numbers; the slot for sequence `s`
// is `slots[s & mask]`. The chain
//
//     claim ≥ publish ≥ stage[0] ≥ stage[1] ≥ … ≥ stage[k-1] (= tail)
//
// partitions the ring into ownership regions:
//
//     [publish, claim)            producers (claimed, maybe not yet written)
//     [stage[i], upstream(i))     stage i, upstream(0) being publish
//     [claim, tail + N)           free for claiming
//
// **Producers** claim with a CAS on `claim` after checking `claim - tail < N`
// (tail loaded with Acquire so the last stage's work on the slot is visible
// before the producer overwrites it). Finishing stamps the slot's ready mark
// (SeqCst) and tries `publish: seq → seq+1` (SeqCst).
//
// **Forwarding**: producers may finish out of order. Whoever finishes, and
// every stage after each chunk, scans forward from `publish` and advances it
// over every slot whose ready mark equals its sequence. The ready-mark store
// and the scan's ready-mark load are both SeqCst, so of two producers
// finishing adjacent sequences at least one observes the other and carries
// `publish` past both.
//
// **Stages** load their upstream boundary with Acquire, process in order, and
// publish their own progress with a single Release store. Only the stage
// itself writes its progress counter, so no CAS is needed.
//
// =============================================================================

/// Failed publish CASes a forwarding scan tolerates before abandoning.
///
/// A failed CAS means another thread moved `publish`, and that thread carries
/// the scan on, so abandoning never strands a ready slot.
const FORWARD_RETRY_LIMIT: u32 = 8;

/// The shared ring: slots, producer counters and per-stage progress.
pub(crate) struct RingBuffer<T> {
    // === PRODUCER HOT ===
    claim: CachePadded<AtomicU64>,
    publish: CachePadded<AtomicU64>,

    // === STAGE HOT ===
    stages: Box<[CachePadded<AtomicU64>]>,
    signals: Box<[WorkerSignal]>,

    // === COLD STATE ===
    waiter: CapacityWaiter,
    closed: AtomicBool,
    metrics: Metrics,
    config: QueueConfig,
    capacity: usize,
    mask: u64,

    // === DATA ===
    slots: Box<[RingSlot<T>]>,
}

// Safety: payload access is serialized by the counter protocol; each slot is
// owned by exactly one party at a time, so sharing the ring only requires
// that payloads can move between threads.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Allocates the ring and every slot payload up front.
    ///
    /// One stage is created per unparker, in pipeline order.
    pub(crate) fn new<F>(
        config: &QueueConfig,
        unparkers: Vec<Unparker>,
        mut factory: F,
    ) -> Result<Self, BuildError>
    where
        F: FnMut(usize) -> T,
    {
        if unparkers.is_empty() {
            return Err(BuildError::NoStages);
        }
        let capacity = config.ring_capacity()?;
        let start = config.initial_sequence;

        let slots = (0..capacity)
            .map(|index| RingSlot::new(index, factory(index)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let stages = unparkers
            .iter()
            .map(|_| CachePadded::new(AtomicU64::new(start)))
            .collect();
        let signals = unparkers.into_iter().map(WorkerSignal::new).collect();

        Ok(Self {
            claim: CachePadded::new(AtomicU64::new(start)),
            publish: CachePadded::new(AtomicU64::new(start)),
            stages,
            signals,
            waiter: CapacityWaiter::new(),
            closed: AtomicBool::new(false),
            metrics: Metrics::new(),
            config: config.clone(),
            capacity,
            mask: capacity as u64 - 1,
            slots,
        })
    }

    // ---------------------------------------------------------------------
    // COUNTERS & STATUS
    // ---------------------------------------------------------------------

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn stage_count(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    pub(crate) fn slot(&self, sequence: u64) -> &RingSlot<T> {
        &self.slots[(sequence & self.mask) as usize]
    }

    #[inline]
    pub(crate) fn claimed(&self) -> u64 {
        self.claim.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn published(&self) -> u64 {
        self.publish.load(Ordering::Acquire)
    }

    /// Own progress counter of `stage`. Written only by that stage.
    #[inline]
    pub(crate) fn progress(&self, stage: usize) -> &AtomicU64 {
        &self.stages[stage]
    }

    /// Boundary `stage` may read up to: publish for the first stage, the
    /// previous stage's progress otherwise.
    #[inline]
    pub(crate) fn upstream(&self, stage: usize) -> &AtomicU64 {
        if stage == 0 {
            &self.publish
        } else {
            &self.stages[stage - 1]
        }
    }

    /// Progress of the last stage; capacity below it is free.
    #[inline]
    pub(crate) fn tail(&self) -> u64 {
        self.stages[self.stages.len() - 1].load(Ordering::Acquire)
    }

    /// Claimed slots not yet released by the last stage.
    #[inline]
    pub(crate) fn size(&self) -> usize {
        let tail = self.tail();
        let claim = self.claimed();
        claim.saturating_sub(tail) as usize
    }

    #[inline]
    pub(crate) fn available(&self) -> usize {
        self.capacity.saturating_sub(self.size())
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    fn has_capacity(&self) -> bool {
        self.size() < self.capacity
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn config(&self) -> &QueueConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn metrics_enabled(&self) -> bool {
        self.config.enable_metrics
    }

    #[inline]
    pub(crate) fn metrics_handle(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn metrics(&self) -> MetricsSnapshot {
        if self.config.enable_metrics {
            self.metrics.snapshot()
        } else {
            MetricsSnapshot::default()
        }
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Claims the next slot.
    ///
    /// Without `wait`, returns `None` as soon as the ring is full. With
    /// `wait`, spins and yields briefly, then blocks on the capacity
    /// condition; gives up with `None` once the configured offer timeout has
    /// elapsed. Returns `None` immediately after [`close`](Self::close).
    pub(crate) fn start_offer(&self, wait: bool) -> Option<OfferSlot<'_, T>> {
        let backoff = Backoff::new();
        let mut deadline: Option<Instant> = None;

        loop {
            if self.is_closed() {
                return None;
            }

            // Tail first: a claim read before a newer tail could trail it.
            let tail = self.tail();
            let claim = self.claim.load(Ordering::Acquire);
            if claim.saturating_sub(tail) < self.capacity as u64 {
                match self.claim.compare_exchange_weak(
                    claim,
                    claim + 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        debug_assert_bounded_count!(claim + 1 - tail, self.capacity);
                        debug_assert_not_ready!(self.slot(claim).ready_mark(), claim);
                        return Some(OfferSlot {
                            ring: self,
                            sequence: claim,
                            finished: false,
                        });
                    }
                    Err(_) => {
                        backoff.spin();
                        continue;
                    }
                }
            }

            // Full: push along anything stuck behind an unpublished slot and
            // make sure the first stage is running, so the tail can move.
            self.forward_publish();
            self.wake_stage(0);

            if !wait {
                if self.config.enable_metrics {
                    self.metrics.add_rejected(1);
                }
                return None;
            }

            let deadline = *deadline.get_or_insert_with(|| Instant::now() + self.config.offer_timeout);
            if !backoff.is_completed() {
                backoff.snooze();
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                if self.config.enable_metrics {
                    self.metrics.add_rejected(1);
                }
                return None;
            }
            if self.config.enable_metrics {
                self.metrics.add_wait();
            }
            self.waiter
                .wait_until(deadline - now, || self.is_closed() || self.has_capacity());
            backoff.reset();
        }
    }

    /// Publishes a finished slot and wakes the first stage.
    fn finish(&self, sequence: u64) {
        self.slot(sequence).mark_ready(sequence);
        // Fails when an earlier claim is still unpublished; the scan below
        // (or that claim's own finish) takes care of it.
        let _ = self.publish.compare_exchange(
            sequence,
            sequence + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.forward_publish();

        if self.config.enable_metrics {
            self.metrics.add_offered(1);
        }
        self.wake_stage(0);
    }

    /// Advances `publish` over every consecutive ready slot.
    ///
    /// Bounded: gives up after [`FORWARD_RETRY_LIMIT`] lost CASes instead of
    /// spinning, and never blocks.
    pub(crate) fn forward_publish(&self) {
        let mut failures = 0;
        loop {
            let publish = self.publish.load(Ordering::SeqCst);
            // A mark equal to the sequence implies it was claimed and
            // finished; marks from earlier laps are smaller by a multiple of N.
            if !self.slot(publish).is_ready(publish) {
                return;
            }
            debug_assert_not_past!("publish", publish + 1, self.claim.load(Ordering::Acquire));
            if self
                .publish
                .compare_exchange(publish, publish + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                failures += 1;
                if failures >= FORWARD_RETRY_LIMIT {
                    return;
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // WAKE-UPS & LIFECYCLE
    // ---------------------------------------------------------------------

    #[inline]
    pub(crate) fn wake_stage(&self, stage: usize) -> bool {
        self.signals[stage].wake()
    }

    #[inline]
    pub(crate) fn signal(&self, stage: usize) -> &WorkerSignal {
        &self.signals[stage]
    }

    /// Wakes producers blocked on a full ring.
    #[inline]
    pub(crate) fn wake_producers(&self) {
        self.waiter.notify();
    }

    /// Stops accepting offers and tells every stage worker to exit.
    ///
    /// Items already in the ring are not drained.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(
            "closing ring {:?} with {} items in flight",
            self.config.thread_name,
            self.size()
        );
        for signal in self.signals.iter() {
            signal.interrupt();
        }
        self.waiter.notify();
    }

    /// One-line diagnostic dump of counters and worker states.
    pub(crate) fn describe(&self) -> String {
        let mut out = format!(
            "{}[capacity={}, claim={}, publish={}, stages=[",
            self.config.thread_name,
            self.capacity,
            self.claimed(),
            self.published()
        );
        for (i, (progress, signal)) in self.stages.iter().zip(self.signals.iter()).enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}:{}", progress.load(Ordering::Acquire), signal.describe());
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

/// A claimed slot, exclusively owned by the producer until finished.
///
/// Dereferences to the slot payload. Hand it back with
/// [`RingQueue::finish_offer`](crate::RingQueue::finish_offer) (or
/// [`finish`](Self::finish)) to publish it.
///
/// **Hazard:** a claimed slot that is never finished stalls every later
/// sequence forever. Dropping an unfinished `OfferSlot` logs a warning but
/// cannot undo the claim.
#[must_use = "a claimed slot stalls the pipeline until it is finished"]
pub struct OfferSlot<'a, T> {
    ring: &'a RingBuffer<T>,
    sequence: u64,
    finished: bool,
}

impl<'a, T> OfferSlot<'a, T> {
    /// Global sequence number of this claim.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Position of the slot within the ring.
    #[inline]
    pub fn index(&self) -> usize {
        self.ring.slot(self.sequence).index()
    }

    /// Publishes the slot to the first stage.
    pub fn finish(mut self) {
        self.finished = true;
        self.ring.finish(self.sequence);
    }

    pub(crate) fn belongs_to(&self, ring: &RingBuffer<T>) -> bool {
        std::ptr::eq(self.ring, ring)
    }
}

impl<T> Deref for OfferSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the sequence is claimed and unpublished, so no stage can
        // reach this slot and no other producer can claim it.
        unsafe { self.ring.slot(self.sequence).payload_mut() }
    }
}

impl<T> DerefMut for OfferSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in `deref`; `&mut self` makes the access unique.
        unsafe { self.ring.slot(self.sequence).payload_mut() }
    }
}

impl<T> Drop for OfferSlot<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "slot for sequence {} was claimed but never finished; the pipeline is stalled at it",
                self.sequence
            );
        }
    }
}
