//! Property-based tests for the pipeline counter invariants.
//!
//! Coverage:
//! - capacity rounding (power of two, minimum 8, never smaller than requested)
//! - bounded in-flight count and `available()` accounting under backpressure
//! - fan-out wake count
//! - in-order single-stage delivery, including producers finishing out of order

use proptest::prelude::*;
use ringstage::{
    from_fn, ring_capacity, wake_count, ProcessResult, QueueConfig, RingQueue, MIN_CAPACITY,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(1));
    }
}

// =============================================================================
// Capacity rounding
// =============================================================================

proptest! {
    #[test]
    fn prop_capacity_is_smallest_power_of_two(requested in 1usize..1_000_000) {
        let capacity = ring_capacity(requested).unwrap();

        prop_assert!(capacity.is_power_of_two());
        prop_assert!(capacity >= requested);
        prop_assert!(capacity >= MIN_CAPACITY);
        // Halving would drop below the request or the minimum.
        prop_assert!(capacity / 2 < requested.max(MIN_CAPACITY));
    }
}

// =============================================================================
// Bounded count: 0 <= claim - tail <= capacity
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// With the only stage blocked, claims succeed exactly until the ring is
    /// full, and `available()` drops by one per claim.
    #[test]
    fn prop_claims_bounded_by_capacity(requested in 1usize..64, attempts in 0usize..160) {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        let g = Arc::clone(&gate);

        let queue = RingQueue::<u64>::builder(QueueConfig::new(requested))
            .stage(from_fn(move |_: &mut u64| -> ProcessResult {
                drop(g.lock().unwrap());
                Ok(())
            }))
            .build()
            .unwrap();
        let capacity = queue.capacity();

        // Keep the claims open so nothing reaches the stage.
        let mut slots = Vec::new();
        for i in 0..attempts {
            match queue.start_offer(false) {
                Some(slot) => {
                    prop_assert!(i < capacity, "claim {} succeeded on a ring of {}", i, capacity);
                    slots.push(slot);
                }
                None => prop_assert!(i >= capacity, "claim {} refused on a ring of {}", i, capacity),
            }
            prop_assert_eq!(queue.available(), capacity - slots.len());
            prop_assert_eq!(queue.size(), slots.len());
        }

        for slot in slots {
            queue.finish_offer(slot);
        }
        drop(held);
        wait_until(|| queue.is_empty());
        prop_assert_eq!(queue.available(), capacity);
    }
}

// =============================================================================
// Fan-out wake count: min(W, ceil(S/O)), zero for an empty backlog
// =============================================================================

proptest! {
    #[test]
    fn prop_wake_count_formula(
        backlog in 0usize..10_000,
        offset in 1usize..256,
        workers in 1usize..64,
    ) {
        let woken = wake_count(backlog, offset, workers);

        prop_assert!(woken <= workers);
        if backlog == 0 {
            prop_assert_eq!(woken, 0);
        } else {
            prop_assert!(woken >= 1);
            prop_assert_eq!(woken, ((backlog + offset - 1) / offset).min(workers));
        }
    }

    #[test]
    fn prop_wake_count_monotonic_in_backlog(
        backlog in 0usize..10_000,
        extra in 0usize..1_000,
        offset in 1usize..256,
        workers in 1usize..64,
    ) {
        prop_assert!(
            wake_count(backlog, offset, workers) <= wake_count(backlog + extra, offset, workers)
        );
    }
}

// =============================================================================
// In-order single-stage delivery
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_single_stage_delivers_in_publish_order(
        values in prop::collection::vec(any::<u32>(), 0..300),
        requested in 1usize..64,
    ) {
        let seen = Arc::new(Mutex::new(Vec::with_capacity(values.len())));
        let s = Arc::clone(&seen);
        let queue = RingQueue::<u32>::builder(QueueConfig::new(requested))
            .stage(from_fn(move |item: &mut u32| -> ProcessResult {
                s.lock().unwrap().push(*item);
                Ok(())
            }))
            .build()
            .unwrap();

        for &v in &values {
            prop_assert!(queue.offer_with(true, |slot| *slot = v));
        }
        wait_until(|| seen.lock().unwrap().len() == values.len());
        prop_assert_eq!(&*seen.lock().unwrap(), &values);
    }
}

/// A ring size, a batch no larger than the ring, and an order to finish it in.
fn batch_and_finish_order() -> impl Strategy<Value = (usize, Vec<usize>)> {
    (1usize..64).prop_flat_map(|requested| {
        let capacity = ring_capacity(requested).unwrap();
        (1..=capacity).prop_flat_map(move |count| {
            (Just(requested), Just((0..count).collect::<Vec<_>>()).prop_shuffle())
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Slots finished in any order still reach the stage in sequence order,
    /// lap after lap.
    #[test]
    fn prop_out_of_order_finish_delivers_in_sequence_order(
        (requested, order) in batch_and_finish_order(),
        rounds in 1usize..4,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let queue = RingQueue::<u64>::builder(QueueConfig::new(requested))
            .stage(from_fn(move |item: &mut u64| -> ProcessResult {
                s.lock().unwrap().push(*item);
                Ok(())
            }))
            .build()
            .unwrap();

        for _ in 0..rounds {
            let mut slots: Vec<_> = (0..order.len())
                .map(|_| {
                    let mut slot = queue.start_offer(false).expect("batch fits in the ring");
                    let sequence = slot.sequence();
                    *slot = sequence;
                    Some(slot)
                })
                .collect();
            for &i in &order {
                if let Some(slot) = slots[i].take() {
                    queue.finish_offer(slot);
                }
            }
            prop_assert!(queue.published() <= queue.claimed());
            wait_until(|| queue.is_empty());
            prop_assert_eq!(queue.published(), queue.claimed());
        }

        let expected: Vec<u64> = (0..(rounds * order.len()) as u64).collect();
        prop_assert_eq!(&*seen.lock().unwrap(), &expected);
    }
}
