//! Error types for queue construction and processing.

use thiserror::Error;

/// Error returned by a processor callback.
///
/// Any error type can be boxed into it with `?` or `.into()`.
pub type ProcessError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type of every processor callback.
pub type ProcessResult = Result<(), ProcessError>;

/// Construction-time faults. Raised by `build()`, never deferred to first use.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A pipeline needs at least one stage.
    #[error("queue requires at least one stage processor")]
    NoStages,

    /// Capacity must be positive.
    #[error("capacity must be greater than zero")]
    ZeroCapacity,

    /// Rounding the requested capacity up to a power of two overflowed.
    #[error("capacity {requested} cannot be rounded up to a power of two")]
    CapacityOverflow {
        /// The requested capacity.
        requested: usize,
    },

    /// The starting sequence leaves no headroom before the counters overflow.
    #[error("initial sequence {sequence} exceeds u64::MAX / 2")]
    InitialSequenceTooLarge {
        /// The configured starting sequence.
        sequence: u64,
    },

    /// A fan-out queue needs at least one worker.
    #[error("multi-worker queue requires at least one worker")]
    NoWorkers,

    /// The fan-out wake offset must be positive.
    #[error("wake offset must be greater than zero")]
    ZeroWakeOffset,

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
