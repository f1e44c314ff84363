//! Cross-process SPSC ring buffer (component B).
//!
//! A single producer and single consumer, potentially in different
//! processes, exchange plain-old-data elements through a fixed-size,
//! inline array embedded directly in a memory-mapped file. Unlike the
//! heap-backed ring this crate's layout is descended from, every byte of
//! state here lives inside the struct itself: no pointer anywhere in
//! `SpscRing` is meaningful across a process boundary, and `T` must be
//! `Copy` and contain no pointers either.
//!
//! Capacity is fixed at `N` slots, one of which is permanently sacrificed
//! to disambiguate full from empty with only two cursors:
//! the ring is full when `tail.wrapping_sub(head) == N as u64 - 1` and
//! empty when `head == tail`. `N` must be a power of two so index
//! wrapping is a mask rather than a division.
//!
//! `head` is written only by the consumer and read by the producer;
//! `tail` is written only by the producer and read by the consumer. A
//! push publishes its element with `Release` before bumping `tail`, and
//! pop's matching `Acquire` load of `tail` is what makes that element's
//! bytes visible before they are read. This pairing is the entire safety
//! argument; it is unchanged by the two cursors living in the same
//! process or in two.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backoff::Backoff;
use crate::invariants::{debug_assert_bounded_count, debug_assert_in_bounds};

/// Pads a value to a full cache line so producer-owned and
/// consumer-owned cursors never share a line (false sharing).
#[repr(align(128))]
struct CacheAligned<T>(T);

/// A fixed-capacity, cross-process-safe single-producer/single-consumer
/// ring buffer of `N` slots holding `T`.
///
/// `T` must be `Copy` and free of pointers/references: instances of this
/// type are designed to live inside memory mapped by more than one
/// process, where any pointer embedded in `T` would dangle on the other
/// side of the mapping.
#[repr(C)]
pub struct SpscRing<T: Copy, const N: usize> {
    head: CacheAligned<AtomicU64>,
    tail: CacheAligned<AtomicU64>,
    slots: UnsafeCell<[MaybeUninit<T>; N]>,
}

// SAFETY: access to `slots` is disciplined by `head`/`tail` acquire-release
// handoff exactly as in a single-process SPSC ring; the consumer never reads
// a slot the producer has not released, and the producer never writes a
// slot the consumer has not yet vacated.
unsafe impl<T: Copy + Send, const N: usize> Sync for SpscRing<T, N> {}
unsafe impl<T: Copy + Send, const N: usize> Send for SpscRing<T, N> {}

impl<T: Copy, const N: usize> SpscRing<T, N> {
    const CAPACITY_CHECK: () = assert!(N > 1 && N.is_power_of_two(), "N must be a power of two greater than 1");

    /// Constructs an empty ring in place.
    ///
    /// Exists so callers can zero-initialize a memory-mapped region and
    /// then construct a ring over it (`head = tail = 0` is the correct
    /// empty state and matches a freshly-zeroed page), without requiring
    /// `T: Default`.
    pub const fn new() -> Self {
        let () = Self::CAPACITY_CHECK;
        Self {
            head: CacheAligned(AtomicU64::new(0)),
            tail: CacheAligned(AtomicU64::new(0)),
            slots: UnsafeCell::new([MaybeUninit::uninit(); N]),
        }
    }

    #[inline]
    fn mask(idx: u64) -> usize {
        (idx as usize) & (N - 1)
    }

    /// Number of elements currently queued, as observed by either side.
    ///
    /// Not atomic as a pair: useful for metrics/diagnostics, not for
    /// deciding whether a subsequent `push`/`pop` will succeed.
    pub fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        N - 1
    }

    /// Producer-side: appends `value`, returning it back on failure if
    /// the ring is full.
    ///
    /// Must only ever be called from the single producer.
    pub fn push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        let count = tail.wrapping_sub(head);
        debug_assert_bounded_count!(count, N as u64);

        if count == (N - 1) as u64 {
            return Err(value);
        }

        let idx = Self::mask(tail);
        debug_assert_in_bounds!(idx, N);
        // SAFETY: only the producer writes this slot, and the consumer
        // cannot be reading it: `count < N - 1` means this slot was
        // vacated by a pop whose `head` bump is already visible via the
        // `Acquire` load above.
        unsafe {
            let slots = &mut *self.slots.get();
            slots[idx].write(value);
        }

        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Producer-side: like `push`, but spins/yields via `Backoff` while
    /// the ring is full, giving up after `max_attempts` retries instead
    /// of retrying forever.
    ///
    /// Returns `Err(value)` if the ring is still full after
    /// `max_attempts` pushes have been tried; callers decide whether to
    /// drop the record or escalate.
    pub fn push_with_backoff(&self, mut value: T, max_attempts: u32) -> Result<(), T> {
        let mut backoff = Backoff::new();
        for _ in 0..max_attempts {
            match self.push(value) {
                Ok(()) => return Ok(()),
                Err(v) => {
                    value = v;
                    backoff.snooze();
                }
            }
        }
        Err(value)
    }

    /// Consumer-side: removes and returns the oldest element, or `None`
    /// if the ring is empty.
    ///
    /// Must only ever be called from the single consumer.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let idx = Self::mask(head);
        debug_assert_in_bounds!(idx, N);
        // SAFETY: `tail` was loaded with `Acquire`, synchronizing with the
        // `Release` store in `push` that published this slot's contents.
        let value = unsafe {
            let slots = &*self.slots.get();
            slots[idx].assume_init()
        };

        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

impl<T: Copy, const N: usize> Default for SpscRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_roundtrip() {
        let ring: SpscRing<u64, 4> = SpscRing::new();
        assert!(ring.is_empty());
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_capacity_sacrifices_one_slot() {
        let ring: SpscRing<u64, 4> = SpscRing::new();
        assert_eq!(ring.capacity(), 3);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        ring.push(3).unwrap();
        assert!(ring.push(4).is_err());
    }

    #[test]
    fn test_push_returns_value_when_full() {
        let ring: SpscRing<u64, 2> = SpscRing::new();
        ring.push(10).unwrap();
        assert_eq!(ring.push(20), Err(20));
    }

    #[test]
    fn test_wraparound() {
        let ring: SpscRing<u64, 4> = SpscRing::new();
        for round in 0..10u64 {
            ring.push(round).unwrap();
            assert_eq!(ring.pop(), Some(round));
        }
    }

    #[test]
    fn test_fifo_order_under_interleaving() {
        let ring: SpscRing<u64, 4> = SpscRing::new();
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        assert_eq!(ring.pop(), Some(1));
        ring.push(3).unwrap();
        ring.push(4).unwrap();
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(4));
    }

    #[test]
    fn test_cross_thread_producer_consumer() {
        const COUNT: u64 = 10_000;
        let ring: Arc<SpscRing<u64, 256>> = Arc::new(SpscRing::new());

        let producer_ring = ring.clone();
        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                loop {
                    if producer_ring.push(i).is_ok() {
                        break;
                    }
                    thread::yield_now();
                }
            }
        });

        let consumer = thread::spawn(move || {
            let mut expected = 0u64;
            while expected < COUNT {
                if let Some(v) = ring.pop() {
                    assert_eq!(v, expected);
                    expected += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        producer.join().unwrap();
        consumer.join().unwrap();
    }
}
