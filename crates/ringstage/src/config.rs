use crate::error::BuildError;
use std::time::Duration;

/// Smallest ring a [`RingQueue`](crate::RingQueue) will allocate.
pub const MIN_CAPACITY: usize = 8;

/// Upper bound on the number of items a stage drains before publishing progress.
pub const MAX_CHUNK: usize = 32;

/// Default time a blocking ring offer waits for capacity.
pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(1);

/// Default time a blocking fan-out offer waits for capacity (10 minutes).
pub const DEFAULT_FANOUT_OFFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Default interval after which a parked worker re-checks for work on its own.
pub const DEFAULT_PARK_TIMEOUT: Duration = Duration::from_millis(50);

/// Default backlog per woken fan-out worker.
pub const DEFAULT_WAKE_OFFSET: usize = 16;

/// Largest accepted [`QueueConfig::initial_sequence`].
///
/// Keeps the counters clear of overflow and of the not-ready slot mark.
pub const MAX_INITIAL_SEQUENCE: u64 = u64::MAX / 2;

/// Rounds a requested capacity up to the ring size actually allocated.
///
/// The result is the next power of two, never smaller than [`MIN_CAPACITY`].
pub fn ring_capacity(requested: usize) -> Result<usize, BuildError> {
    if requested == 0 {
        return Err(BuildError::ZeroCapacity);
    }
    requested
        .max(MIN_CAPACITY)
        .checked_next_power_of_two()
        .ok_or(BuildError::CapacityOverflow { requested })
}

/// Number of items a stage processes between progress publications.
///
/// `min(32, max(1, capacity / 8))`
#[inline]
pub const fn chunk_size(capacity: usize) -> usize {
    let eighth = capacity / 8;
    let chunk = if eighth == 0 { 1 } else { eighth };
    if chunk > MAX_CHUNK {
        MAX_CHUNK
    } else {
        chunk
    }
}

/// Configuration for [`RingQueue`](crate::RingQueue) and
/// [`ValueQueue`](crate::ValueQueue).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Requested number of slots. Rounded up to a power of two (minimum 8).
    pub capacity: usize,
    /// Sequence number the claim, publish and stage counters start at.
    ///
    /// The ring behaves as if this many items had already passed through it.
    pub initial_sequence: u64,
    /// How long a blocking offer waits for capacity before giving up.
    pub offer_timeout: Duration,
    /// Safety-net poll interval for parked stage workers.
    pub park_timeout: Duration,
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
    /// Prefix for stage worker thread names.
    pub thread_name: String,
}

impl QueueConfig {
    /// Creates a configuration with the given capacity and defaults elsewhere.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Small ring with tight polling.
    pub fn low_latency() -> Self {
        Self {
            capacity: 256,
            park_timeout: Duration::from_millis(1),
            ..Self::default()
        }
    }

    /// Large ring with relaxed polling.
    pub fn high_throughput() -> Self {
        Self {
            capacity: 64 * 1024,
            park_timeout: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Sets the requested capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the starting sequence number.
    pub fn with_initial_sequence(mut self, sequence: u64) -> Self {
        self.initial_sequence = sequence;
        self
    }

    /// Sets the blocking offer timeout.
    pub fn with_offer_timeout(mut self, timeout: Duration) -> Self {
        self.offer_timeout = timeout;
        self
    }

    /// Sets the worker park timeout.
    pub fn with_park_timeout(mut self, timeout: Duration) -> Self {
        self.park_timeout = timeout;
        self
    }

    /// Enables or disables metrics.
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    /// Sets the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Returns the number of slots the ring will allocate.
    ///
    /// Also rejects an `initial_sequence` above [`MAX_INITIAL_SEQUENCE`].
    pub fn ring_capacity(&self) -> Result<usize, BuildError> {
        if self.initial_sequence > MAX_INITIAL_SEQUENCE {
            return Err(BuildError::InitialSequenceTooLarge {
                sequence: self.initial_sequence,
            });
        }
        ring_capacity(self.capacity)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            initial_sequence: 0,
            offer_timeout: DEFAULT_OFFER_TIMEOUT,
            park_timeout: DEFAULT_PARK_TIMEOUT,
            enable_metrics: false,
            thread_name: "ringstage".to_string(),
        }
    }
}

/// Configuration for [`MultiWorkerQueue`](crate::MultiWorkerQueue).
#[derive(Debug, Clone)]
pub struct MultiWorkerConfig {
    /// Exact capacity of the shared queue (not rounded).
    pub capacity: usize,
    /// Number of worker threads.
    pub workers: usize,
    /// Backlog size that justifies waking one more worker.
    pub wake_offset: usize,
    /// How long a blocking offer waits for capacity before giving up.
    pub offer_timeout: Duration,
    /// Safety-net poll interval for parked workers.
    pub park_timeout: Duration,
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl MultiWorkerConfig {
    /// Creates a configuration with the given capacity and worker count.
    pub fn new(capacity: usize, workers: usize) -> Self {
        Self {
            capacity,
            workers,
            ..Self::default()
        }
    }

    /// Sets the wake offset.
    pub fn with_wake_offset(mut self, offset: usize) -> Self {
        self.wake_offset = offset;
        self
    }

    /// Sets the blocking offer timeout.
    pub fn with_offer_timeout(mut self, timeout: Duration) -> Self {
        self.offer_timeout = timeout;
        self
    }

    /// Sets the worker park timeout.
    pub fn with_park_timeout(mut self, timeout: Duration) -> Self {
        self.park_timeout = timeout;
        self
    }

    /// Enables or disables metrics.
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    /// Sets the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if self.capacity == 0 {
            return Err(BuildError::ZeroCapacity);
        }
        if self.workers == 0 {
            return Err(BuildError::NoWorkers);
        }
        if self.wake_offset == 0 {
            return Err(BuildError::ZeroWakeOffset);
        }
        Ok(())
    }
}

impl Default for MultiWorkerConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 4,
            wake_offset: DEFAULT_WAKE_OFFSET,
            offer_timeout: DEFAULT_FANOUT_OFFER_TIMEOUT,
            park_timeout: DEFAULT_PARK_TIMEOUT,
            enable_metrics: false,
            thread_name: "ringstage-worker".to_string(),
        }
    }
}
