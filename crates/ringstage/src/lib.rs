//! ringstage - Lock-Free Multi-Stage Ring-Buffer Pipeline
//!
//! Producers hand work items to an ordered chain of single-threaded stages
//! through one pre-allocated ring. Every stage sees every item, in publish
//! order, strictly after the previous stage is done with it. Memory is
//! bounded by the ring size; producers block (or are refused) when it is full.
//!
//! # Key Features
//!
//! - Claim/publish split: producers fill slots in place and finish out of
//!   order; whoever publishes next carries later finished slots along
//! - One progress counter per stage, published in chunks with a single store
//! - Idempotent worker wake (schedule-if-idle, mark-pending-if-running)
//! - [`ValueQueue`] for owned values, [`MultiWorkerQueue`] for unordered
//!   fan-out with backlog-proportional wake-up
//!
//! # Example
//!
//! ```
//! use ringstage::{from_fn, ProcessResult, QueueConfig, RingQueue};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//!
//! let queue = RingQueue::<u32>::builder(QueueConfig::new(8))
//!     .stage(from_fn(|item: &mut u32| -> ProcessResult {
//!         *item += 100;
//!         Ok(())
//!     }))
//!     .stage(from_fn(move |item: &mut u32| -> ProcessResult {
//!         sink.lock().unwrap().push(*item);
//!         Ok(())
//!     }))
//!     .build()
//!     .unwrap();
//!
//! for i in 0..3 {
//!     assert!(queue.offer_with(true, |slot| *slot = i));
//! }
//! while !queue.is_empty() {
//!     std::thread::yield_now();
//! }
//! assert_eq!(*seen.lock().unwrap(), [100, 101, 102]);
//! ```

mod config;
mod error;
mod invariants;
mod metrics;
mod multi_worker;
mod processor;
mod queue;
mod ring;
mod slot;
mod stage;
mod value_queue;
mod waiter;
mod worker;

pub use config::{
    chunk_size, ring_capacity, MultiWorkerConfig, QueueConfig, DEFAULT_FANOUT_OFFER_TIMEOUT,
    DEFAULT_OFFER_TIMEOUT, DEFAULT_PARK_TIMEOUT, DEFAULT_WAKE_OFFSET, MAX_CHUNK,
    MAX_INITIAL_SEQUENCE, MIN_CAPACITY,
};
pub use error::{BuildError, ProcessError, ProcessResult};
pub use metrics::MetricsSnapshot;
pub use multi_worker::{wake_count, MultiWorkerQueue};
pub use processor::{from_fn, FnProcessor, Processor, ValueProcessor};
pub use queue::{RingQueue, RingQueueBuilder};
pub use ring::OfferSlot;
pub use slot::ValueSlot;
pub use value_queue::ValueQueue;
