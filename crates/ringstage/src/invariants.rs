//! Debug assertion macros for pipeline counter invariants.
//!
//! Active only in debug builds (`#[cfg(debug_assertions)]`); they compile to
//! nothing in release builds.
//!
//! Counters are unbounded `u64` sequence numbers. Plain `<=` comparisons are
//! therefore valid: wrap-around would take centuries at realistic rates.

// =============================================================================
// Counter chain: claim ≥ publish ≥ stage₁ ≥ … ≥ tail
// =============================================================================

/// Assert that a downstream counter never overtakes its upstream counter.
///
/// Used in: `StageConsumer::consume()` before storing progress,
/// `RingBuffer::forward_publish()` before advancing publish.
macro_rules! debug_assert_not_past {
    ($name:literal, $downstream:expr, $upstream:expr) => {
        debug_assert!(
            $downstream <= $upstream,
            "counter chain violated: {} {} overtook its upstream {}",
            $name,
            $downstream,
            $upstream
        )
    };
}

// =============================================================================
// Bounded in-flight count: claim − tail ≤ capacity
// =============================================================================

/// Assert that the number of claimed-but-unreclaimed slots fits the ring.
///
/// Used in: `RingBuffer::start_offer()` after a successful claim.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity as u64,
            "bounded count violated: {} slots in flight exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

// =============================================================================
// Monotonic progress
// =============================================================================

/// Assert that a counter only moves forward.
///
/// Used in: `StageConsumer::consume()` when publishing stage progress.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "monotonic progress violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// Ready mark
// =============================================================================

/// Assert that a slot is not yet marked ready for the sequence being claimed.
///
/// Used in: `RingBuffer::start_offer()` after a successful claim.
macro_rules! debug_assert_not_ready {
    ($ready:expr, $sequence:expr) => {
        debug_assert!(
            $ready != $sequence,
            "ready mark violated: slot already marked ready for unpublished sequence {}",
            $sequence
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_not_past;
pub(crate) use debug_assert_not_ready;
