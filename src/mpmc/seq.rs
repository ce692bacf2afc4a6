//! Per-slot-sequence MPMC ring.
//!
//! # Algorithm
//!
//! Dmitry Vyukov's bounded MPMC queue: instead of a shared claim cursor,
//! every slot carries an atomic sequence number that encodes its role.
//!
//! - Initial: slot index (0, 1, 2, ..., N-1)
//! - After a producer publishes at position `p`: `p + 1` ("data ready")
//! - After a consumer releases position `p`: `p + N` ("slot free")
//!
//! Producers and consumers each read their cursor, compare the slot's
//! sequence against it, and either CAS the cursor forward (the slot is
//! theirs this turn), report full/empty (the slot lags), or reload the
//! cursor and retry (somebody else advanced it). The split-cursor sibling
//! [`crate::mpmc::queue::MpmcQueue`] avoids the per-slot atomic and is
//! usually faster; this design never makes one producer wait for another's
//! commit.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cursor::{Cursor, distance};
use crate::mpmc::round_capacity;

/// A slot with its gating sequence number, aligned so neighbouring slots do
/// not false-share under concurrent producers.
#[repr(C, align(64))]
struct Slot<E> {
    sequence: AtomicU64,
    value: UnsafeCell<MaybeUninit<E>>,
}

/// Bounded lock-free MPMC queue where each slot gates itself.
pub struct SeqQueue<E> {
    buffer: Box<[Slot<E>]>,
    mask: u64,
    capacity: usize,
    /// Consumer cursor.
    head: Cursor,
    /// Producer cursor.
    tail: Cursor,
}

// SAFETY: slot access is gated by the per-slot sequence protocol; sharing
// the queue across threads only requires the elements to be Send.
unsafe impl<E: Send> Send for SeqQueue<E> {}
unsafe impl<E: Send> Sync for SeqQueue<E> {}

impl<E> SeqQueue<E> {
    /// Create a queue with at least `capacity` slots.
    ///
    /// The actual capacity is the next power of two, with a floor of 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = round_capacity(capacity);
        let buffer = (0..capacity as u64)
            .map(|i| Slot {
                sequence: AtomicU64::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer,
            mask: capacity as u64 - 1,
            capacity,
            head: Cursor::new(0),
            tail: Cursor::new(0),
        }
    }

    #[inline]
    fn slot(&self, position: u64) -> &Slot<E> {
        &self.buffer[(position & self.mask) as usize]
    }

    /// Attempt to enqueue without blocking.
    ///
    /// # Errors
    ///
    /// Returns the element back when the queue is full.
    pub fn offer(&self, e: E) -> Result<(), E> {
        loop {
            let tail = self.tail.load();
            let slot = self.slot(tail);
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = distance(sequence, tail);
            if diff == 0 {
                // Writable this turn; try to claim the position.
                if self.tail.compare_exchange(tail, tail.wrapping_add(1)) {
                    // SAFETY: winning the CAS while `sequence == tail` grants
                    // exclusive write access until the release store below.
                    unsafe {
                        (*slot.value.get()).write(e);
                    }
                    slot.sequence
                        .store(tail.wrapping_add(1), Ordering::Release);
                    return Ok(());
                }
                // Lost the claim; retry with a fresh tail.
            } else if diff < 0 {
                // The consumer has not released this slot yet: full.
                return Err(e);
            }
            // diff > 0: another producer advanced past us; reload and retry.
        }
    }

    /// Attempt to dequeue without blocking. `None` means empty.
    pub fn poll(&self) -> Option<E> {
        loop {
            let head = self.head.load();
            let slot = self.slot(head);
            let sequence = slot.sequence.load(Ordering::Acquire);
            let diff = distance(sequence, head.wrapping_add(1));
            if diff == 0 {
                if self.head.compare_exchange(head, head.wrapping_add(1)) {
                    // SAFETY: winning the CAS while `sequence == head + 1`
                    // grants exclusive read access; the producer's release
                    // store made the value visible.
                    let e = unsafe { (*slot.value.get()).assume_init_read() };
                    slot.sequence
                        .store(head.wrapping_add(self.capacity as u64), Ordering::Release);
                    return Some(e);
                }
            } else if diff < 0 {
                // Nothing published at this position yet: empty.
                return None;
            }
            // diff > 0: another consumer advanced past us; reload and retry.
        }
    }

    /// Dequeue up to `max` elements into `out`. Returns the number drained.
    pub fn remove_batch(&self, out: &mut Vec<E>, max: usize) -> usize {
        let mut drained = 0;
        while drained < max {
            match self.poll() {
                Some(e) => {
                    out.push(e);
                    drained += 1;
                }
                None => break,
            }
        }
        drained
    }

    /// Drain the queue. With no concurrent producers the queue is empty on
    /// return.
    pub fn clear(&self) {
        while self.poll().is_some() {}
    }

    /// Number of committed elements. A racy snapshot under concurrency.
    pub fn len(&self) -> usize {
        distance(self.tail.load(), self.head.load()).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        distance(self.tail.load(), self.head.load()) <= 0
    }

    /// The rounded power-of-two capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<E: Copy> SeqQueue<E> {
    /// Non-destructive read of the head element.
    ///
    /// Weakly consistent: the copy is only trusted when the slot sequence is
    /// unchanged on both sides of it, so a concurrently consumed element is
    /// reported as `None` rather than torn.
    pub fn peek(&self) -> Option<E> {
        let head = self.head.load();
        let slot = self.slot(head);
        let ready = head.wrapping_add(1);
        if distance(slot.sequence.load(Ordering::Acquire), ready) != 0 {
            return None;
        }
        // SAFETY: `E: Copy`, and the bytes are only interpreted after the
        // sequence re-check proves the slot was not recycled while they were
        // read; the producer's release store made them visible before the
        // first check.
        let value = unsafe { *slot.value.get() };
        if distance(slot.sequence.load(Ordering::Acquire), ready) == 0 {
            Some(unsafe { value.assume_init() })
        } else {
            None
        }
    }

    /// Whether `target` is currently in the queue. Weakly consistent, like
    /// [`peek`](Self::peek): slots recycled mid-scan are skipped.
    pub fn contains(&self, target: &E) -> bool
    where
        E: PartialEq,
    {
        let head = self.head.load();
        let len = distance(self.tail.load(), head).max(0) as u64;
        for i in 0..len {
            let position = head.wrapping_add(i);
            let slot = self.slot(position);
            let ready = position.wrapping_add(1);
            if distance(slot.sequence.load(Ordering::Acquire), ready) != 0 {
                continue;
            }
            // SAFETY: same validated-copy protocol as `peek`.
            let value = unsafe { *slot.value.get() };
            if distance(slot.sequence.load(Ordering::Acquire), ready) == 0
                && unsafe { value.assume_init() } == *target
            {
                return true;
            }
        }
        false
    }
}

impl<E> Drop for SeqQueue<E> {
    fn drop(&mut self) {
        // Exclusive access: release whatever is still committed.
        while self.poll().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn offer_poll_round_trip() {
        let queue = SeqQueue::new(8);
        assert!(queue.offer(42).is_ok());
        assert_eq!(queue.poll(), Some(42));
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn fills_to_capacity_then_rejects() {
        let queue = SeqQueue::new(4);
        for i in 1..=4 {
            assert!(queue.offer(i).is_ok(), "offer {i} should fit");
        }
        assert_eq!(queue.offer(5), Err(5));
        for i in 1..=4 {
            assert_eq!(queue.poll(), Some(i));
        }
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn requested_capacity_rounds_up() {
        let queue = SeqQueue::<u32>::new(3);
        assert_eq!(queue.capacity(), 4);
        let queue = SeqQueue::<u32>::new(0);
        assert_eq!(queue.capacity(), 2);
    }

    #[test]
    fn wraps_through_many_ring_cycles() {
        let queue = SeqQueue::new(4);
        for round in 0..100u64 {
            for i in 0..4 {
                queue.offer(round * 10 + i).unwrap();
            }
            for i in 0..4 {
                assert_eq!(queue.poll(), Some(round * 10 + i));
            }
            assert_eq!(queue.poll(), None);
        }
    }

    #[test]
    fn peek_does_not_consume() {
        let queue = SeqQueue::new(4);
        assert_eq!(queue.peek(), None);
        queue.offer(7).unwrap();
        assert_eq!(queue.peek(), Some(7));
        assert_eq!(queue.peek(), Some(7));
        assert_eq!(queue.poll(), Some(7));
        assert_eq!(queue.peek(), None);
    }

    #[test]
    fn contains_scans_the_committed_range() {
        let queue = SeqQueue::new(4);
        queue.offer(10).unwrap();
        queue.offer(20).unwrap();
        assert!(queue.contains(&10));
        assert!(queue.contains(&20));
        assert!(!queue.contains(&30));
        queue.poll();
        assert!(!queue.contains(&10));
    }

    #[test]
    fn remove_batch_drains_in_order() {
        let queue = SeqQueue::new(8);
        for i in 0..6 {
            queue.offer(i).unwrap();
        }
        let mut out = Vec::new();
        assert_eq!(queue.remove_batch(&mut out, 4), 4);
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(queue.remove_batch(&mut out, 10), 2);
        assert_eq!(queue.remove_batch(&mut out, 10), 0);
    }

    #[test]
    fn producers_and_consumers_exchange_everything() {
        let queue: Arc<SeqQueue<u64>> = Arc::new(SeqQueue::new(64));
        let producers = 2;
        let consumers = 2;
        let per_producer = 5_000u64;

        let producer_handles: Vec<_> = (0..producers)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        let mut value = p * 1_000_000 + i;
                        loop {
                            match queue.offer(value) {
                                Ok(()) => break,
                                Err(returned) => {
                                    value = returned;
                                    thread::yield_now();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let per_consumer = (producers * per_producer) / consumers;
        let consumer_handles: Vec<_> = (0..consumers)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while (taken.len() as u64) < per_consumer {
                        match queue.poll() {
                            Some(item) => taken.push(item),
                            None => thread::yield_now(),
                        }
                    }
                    taken
                })
            })
            .collect();

        for handle in producer_handles {
            handle.join().unwrap();
        }
        let mut items: Vec<u64> = consumer_handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        items.sort_unstable();
        let mut expected: Vec<u64> = (0..producers)
            .flat_map(|p| (0..per_producer).map(move |i| p * 1_000_000 + i))
            .collect();
        expected.sort_unstable();
        assert_eq!(items, expected);
    }

    #[test]
    fn drops_remaining_elements() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let queue = SeqQueue::new(4);
        assert!(queue.offer(Tracked).is_ok());
        assert!(queue.offer(Tracked).is_ok());
        drop(queue.poll());
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
        drop(queue);
        assert_eq!(DROPS.load(Ordering::Relaxed), 2);
    }
}
