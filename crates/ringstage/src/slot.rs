use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ready mark of a slot that has never been published.
///
/// Starting sequences are capped at
/// [`MAX_INITIAL_SEQUENCE`](crate::MAX_INITIAL_SEQUENCE), so no sequence
/// reaches `u64::MAX` and the mark never matches.
pub(crate) const NOT_READY: u64 = u64::MAX;

/// One pre-allocated entry of the ring.
///
/// The payload is reused for every lap around the ring. Access to it is
/// governed entirely by the counter protocol: whoever sits between the
/// relevant pair of counters owns it exclusively.
pub(crate) struct RingSlot<T> {
    index: usize,
    ready: AtomicU64,
    payload: UnsafeCell<T>,
}

impl<T> RingSlot<T> {
    pub(crate) fn new(index: usize, payload: T) -> Self {
        Self {
            index,
            ready: AtomicU64::new(NOT_READY),
            payload: UnsafeCell::new(payload),
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Marks the slot published for `sequence`.
    ///
    /// SeqCst pairs with the load in [`is_ready`](Self::is_ready) so a
    /// finishing producer and a forwarding helper cannot both miss each other.
    #[inline]
    pub(crate) fn mark_ready(&self, sequence: u64) {
        self.ready.store(sequence, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn is_ready(&self, sequence: u64) -> bool {
        self.ready.load(Ordering::SeqCst) == sequence
    }

    #[inline]
    pub(crate) fn ready_mark(&self) -> u64 {
        self.ready.load(Ordering::Relaxed)
    }

    /// # Safety
    ///
    /// The caller must own the slot under the counter protocol for the whole
    /// lifetime of the returned reference.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self) -> &mut T {
        &mut *self.payload.get()
    }
}

/// Generic payload holder used by [`ValueQueue`](crate::ValueQueue).
///
/// Boxes one arbitrary value per slot so callers need not define their own
/// slot type. The value is taken out as soon as it is processed, so the ring
/// never keeps a stale payload alive between laps.
#[derive(Debug)]
pub struct ValueSlot<V> {
    value: Option<V>,
}

impl<V> ValueSlot<V> {
    /// Creates an empty slot.
    pub const fn new() -> Self {
        Self { value: None }
    }

    /// Stores a value, replacing (and dropping) any leftover one.
    #[inline]
    pub fn init(&mut self, value: V) {
        self.value = Some(value);
    }

    /// Moves the value out, leaving the slot empty.
    #[inline]
    pub fn get_and_clear(&mut self) -> Option<V> {
        self.value.take()
    }

    /// Returns a reference to the value, if any.
    #[inline]
    pub fn get(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Returns `true` if the slot holds no value.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

impl<V> Default for ValueSlot<V> {
    fn default() -> Self {
        Self::new()
    }
}
