use crate::invariants::{debug_assert_monotonic, debug_assert_not_past};
use crate::processor::{guarded, Processor};
use crate::ring::RingBuffer;
use crate::worker::{Drain, WorkerSignal};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Drives one stage: reads up to its upstream boundary, processes in order,
/// publishes its own progress.
pub(crate) struct StageConsumer<T> {
    ring: Arc<RingBuffer<T>>,
    stage: usize,
    chunk: u64,
    busy: bool,
    processor: Box<dyn Processor<T>>,
}

impl<T> StageConsumer<T> {
    pub(crate) fn new(ring: Arc<RingBuffer<T>>, stage: usize, processor: Box<dyn Processor<T>>) -> Self {
        let chunk = crate::config::chunk_size(ring.capacity()) as u64;
        Self {
            ring,
            stage,
            chunk,
            busy: false,
            processor,
        }
    }

    /// Processes everything between own progress and the upstream boundary.
    ///
    /// Progress is published every `chunk` items so the next stage, and
    /// producers waiting for capacity, see it without waiting for the whole
    /// backlog. Returns the number of items processed.
    pub(crate) fn consume(&mut self) -> u64 {
        let ring = &*self.ring;
        let stage = self.stage;
        let upstream = ring.upstream(stage);
        let own = ring.progress(stage);
        let last_stage = stage + 1 == ring.stage_count();

        let mut progress = own.load(Ordering::Relaxed);
        let mut processed = 0u64;
        let mut failures = 0u64;

        loop {
            let boundary = upstream.load(Ordering::Acquire);
            debug_assert_not_past!("stage progress", progress, boundary);
            if progress >= boundary || ring.is_closed() {
                break;
            }

            if !self.busy {
                self.busy = true;
                guarded("stage", stage, "on_process_start", || self.processor.on_process_start());
            }

            let end = boundary.min(progress + self.chunk);
            while progress < end {
                // SAFETY: `progress < boundary` and `progress >= own`, so the
                // slot lies in this stage's exclusive region.
                let item = unsafe { ring.slot(progress).payload_mut() };
                if !guarded("stage", stage, "process", || self.processor.process(item)) {
                    failures += 1;
                }
                progress += 1;
                processed += 1;
            }

            debug_assert_monotonic!("stage progress", own.load(Ordering::Relaxed), progress);
            own.store(progress, Ordering::Release);

            if !last_stage {
                ring.wake_stage(stage + 1);
            }
            ring.forward_publish();
            ring.wake_producers();
        }

        if processed > 0 {
            guarded("stage", stage, "on_process_complete", || {
                self.processor.on_process_complete()
            });
            if ring.metrics_enabled() {
                let metrics = ring.metrics_handle();
                metrics.add_processed(processed);
                metrics.add_failures(failures);
                metrics.add_batch();
            }
        }
        processed
    }

    /// Whether the upstream boundary is ahead of own progress.
    pub(crate) fn has_work(&self) -> bool {
        self.ring.upstream(self.stage).load(Ordering::Acquire)
            > self.ring.progress(self.stage).load(Ordering::Relaxed)
    }
}

impl<T: Send> Drain for StageConsumer<T> {
    fn signal(&self) -> &WorkerSignal {
        self.ring.signal(self.stage)
    }

    fn is_closed(&self) -> bool {
        self.ring.is_closed()
    }

    fn has_work(&self) -> bool {
        StageConsumer::has_work(self)
    }

    fn drain(&mut self) {
        self.consume();
    }

    fn on_idle(&mut self) {
        self.busy = false;
    }
}
