//! Processor callbacks supplied by the application.
//!
//! A processor is driven by exactly one worker thread at a time, so it takes
//! `&mut self` and needs only `Send`.

use crate::error::ProcessResult;
use log::{error, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Per-stage callback of a [`RingQueue`](crate::RingQueue).
///
/// # Contract
///
/// - `on_process_start` runs once each time the stage goes from idle to busy.
/// - `process` runs once per item, strictly in sequence order.
/// - `on_process_complete` runs once per drained batch, even if an item
///   callback failed or panicked during that batch.
///
/// Errors from any callback are logged and otherwise ignored: the item still
/// counts as consumed. Retries or dead-lettering are the processor's concern.
pub trait Processor<T>: Send {
    /// Called before the first item after the stage was idle.
    fn on_process_start(&mut self) -> ProcessResult {
        Ok(())
    }

    /// Processes one item in place.
    fn process(&mut self, item: &mut T) -> ProcessResult;

    /// Called after the stage has caught up with its upstream.
    fn on_process_complete(&mut self) -> ProcessResult {
        Ok(())
    }
}

impl<T, P: Processor<T> + ?Sized> Processor<T> for Box<P> {
    fn on_process_start(&mut self) -> ProcessResult {
        (**self).on_process_start()
    }

    fn process(&mut self, item: &mut T) -> ProcessResult {
        (**self).process(item)
    }

    fn on_process_complete(&mut self) -> ProcessResult {
        (**self).on_process_complete()
    }
}

/// Callback receiving owned values from [`ValueQueue`](crate::ValueQueue) and
/// [`MultiWorkerQueue`](crate::MultiWorkerQueue).
///
/// Same contract as [`Processor`], except that `process` takes ownership of
/// the value.
pub trait ValueProcessor<V>: Send {
    /// Called before the first value after the worker was idle.
    fn on_process_start(&mut self) -> ProcessResult {
        Ok(())
    }

    /// Processes one value.
    fn process(&mut self, value: V) -> ProcessResult;

    /// Called after the worker has drained everything visible to it.
    fn on_process_complete(&mut self) -> ProcessResult {
        Ok(())
    }
}

impl<V, P: ValueProcessor<V> + ?Sized> ValueProcessor<V> for Box<P> {
    fn on_process_start(&mut self) -> ProcessResult {
        (**self).on_process_start()
    }

    fn process(&mut self, value: V) -> ProcessResult {
        (**self).process(value)
    }

    fn on_process_complete(&mut self) -> ProcessResult {
        (**self).on_process_complete()
    }
}

/// Processor built from a closure, with no-op start/complete hooks.
///
/// Works as a [`Processor`] for `FnMut(&mut T) -> ProcessResult` closures and
/// as a [`ValueProcessor`] for `FnMut(V) -> ProcessResult` closures.
///
/// ```
/// use ringstage::{from_fn, ProcessResult};
///
/// let mut total = 0u64;
/// let _stage = from_fn(move |item: &mut u64| -> ProcessResult {
///     total += *item;
///     Ok(())
/// });
/// ```
pub struct FnProcessor<F> {
    f: F,
}

/// Wraps a closure as a processor.
pub fn from_fn<F>(f: F) -> FnProcessor<F> {
    FnProcessor { f }
}

impl<T, F> Processor<T> for FnProcessor<F>
where
    F: FnMut(&mut T) -> ProcessResult + Send,
{
    fn process(&mut self, item: &mut T) -> ProcessResult {
        (self.f)(item)
    }
}

impl<V, F> ValueProcessor<V> for FnProcessor<F>
where
    F: FnMut(V) -> ProcessResult + Send,
{
    fn process(&mut self, value: V) -> ProcessResult {
        (self.f)(value)
    }
}

/// Runs one processor callback, containing both `Err` results and panics.
///
/// Returns `false` if the callback failed. The failure is logged; the caller
/// carries on as if the callback had succeeded.
pub(crate) fn guarded<F>(owner: &str, index: usize, hook: &str, f: F) -> bool
where
    F: FnOnce() -> ProcessResult,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{owner} {index}: {hook} failed: {e}");
            false
        }
        Err(payload) => {
            error!("{owner} {index}: {hook} panicked: {}", panic_message(payload.as_ref()));
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
