//! Split-cursor MPMC ring (claim-then-commit).
//!
//! # Overview
//!
//! Four free-running cursors sequence access to a power-of-two slot array:
//!
//! - `tail` counts committed enqueues; the next free slot is `tail & mask`
//! - `tail_cursor` is the producer claim cursor, advanced by CAS before the
//!   slot is written
//! - `head` counts committed dequeues
//! - `head_cursor` is the consumer claim cursor
//!
//! A producer claims a slot by CASing `tail_cursor` from the committed
//! `tail`, writes the slot, then publishes with a release store of `tail`.
//! Because the CAS always starts from the committed cursor, at most one
//! producer is between claim and commit at a time; rivals spin through the
//! progressive-yield curve. Consumers mirror the protocol on the head side.
//! A producer-side cache of `head` avoids reading the consumers' line on
//! every full-check.
//!
//! # Safety
//!
//! A thread owns slot `position & mask` exclusively from the moment its
//! claim CAS succeeds until its release store of the matching committed
//! cursor. All slot access below happens inside such a window, which is what
//! every `SAFETY` comment in this file appeals to.

use std::cell::UnsafeCell;

use crate::cursor::{Cursor, distance};
use crate::mpmc::round_capacity;
use crate::spin::progressive_yield;

/// Bounded lock-free MPMC queue over a ring of `Option` slots.
///
/// Arbitrary numbers of producers and consumers may share one instance (via
/// `Arc` or a reference). Per-producer FIFO order is preserved; ordering
/// across producers follows claim order.
pub struct MpmcQueue<E> {
    buffer: Box<[UnsafeCell<Option<E>>]>,
    mask: u64,
    capacity: usize,
    /// Committed enqueue count.
    tail: Cursor,
    /// Producer claim cursor; runs at most one ahead of `tail`.
    tail_cursor: Cursor,
    /// Producers' cache of `head`, refreshed only when the queue looks full.
    head_cache: Cursor,
    /// Committed dequeue count.
    head: Cursor,
    /// Consumer claim cursor.
    head_cursor: Cursor,
}

// SAFETY: slot access is serialized by the claim/commit protocol above, so
// sharing the queue across threads only requires the elements to be Send.
unsafe impl<E: Send> Send for MpmcQueue<E> {}
unsafe impl<E: Send> Sync for MpmcQueue<E> {}

impl<E> MpmcQueue<E> {
    /// Create a queue with at least `capacity` slots.
    ///
    /// The actual capacity is the next power of two, with a floor of 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = round_capacity(capacity);
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer,
            mask: capacity as u64 - 1,
            capacity,
            tail: Cursor::new(0),
            tail_cursor: Cursor::new(0),
            head_cache: Cursor::new(0),
            head: Cursor::new(0),
            head_cursor: Cursor::new(0),
        }
    }

    #[inline]
    fn slot(&self, position: u64) -> *mut Option<E> {
        let index = (position & self.mask) as usize;
        // SAFETY: `mask` keeps the index within the buffer.
        unsafe { self.buffer.get_unchecked(index) }.get()
    }

    /// Attempt to enqueue without blocking.
    ///
    /// # Errors
    ///
    /// Returns the element back when the queue is full.
    pub fn offer(&self, e: E) -> Result<(), E> {
        let mut spin = 0;
        loop {
            let tail = self.tail.load();
            if self.is_full_at(tail) {
                return Err(e);
            }
            if self.tail_cursor.compare_exchange(tail, tail.wrapping_add(1)) {
                // SAFETY: the claim CAS grants exclusive access to this slot
                // until the committing store of `tail` below. The full-check
                // proved the consumer side has released it.
                unsafe {
                    *self.slot(tail) = Some(e);
                }
                self.tail.lazy_set(tail.wrapping_add(1));
                return Ok(());
            }
            // Another producer is between claim and commit; wait it out.
            spin = progressive_yield(spin);
        }
    }

    /// Attempt to dequeue without blocking. `None` means empty.
    pub fn poll(&self) -> Option<E> {
        let mut spin = 0;
        loop {
            let head = self.head.load();
            if distance(self.tail.load(), head) <= 0 {
                return None;
            }
            if self.head_cursor.compare_exchange(head, head.wrapping_add(1)) {
                self.wait_for_commit(head.wrapping_add(1));
                // SAFETY: exclusive claim window for this slot; the commit
                // wait proved the producer's slot write is visible.
                let e = unsafe { (*self.slot(head)).take() };
                self.head.lazy_set(head.wrapping_add(1));
                return e;
            }
            spin = progressive_yield(spin);
        }
    }

    /// Non-destructive read of the head element.
    ///
    /// Implemented as a single-attempt transient claim of the consumer
    /// cursor so the clone cannot race a concurrent `poll` clearing the
    /// slot; returns `None` if another consumer holds the claim.
    pub fn peek(&self) -> Option<E>
    where
        E: Clone,
    {
        let head = self.head.load();
        if distance(self.tail.load(), head) <= 0 {
            return None;
        }
        if !self.head_cursor.compare_exchange(head, head.wrapping_add(1)) {
            return None;
        }
        // SAFETY: the transient claim blocks every other consumer until the
        // cursor is restored, and producers never touch a committed slot.
        let e = unsafe { (*self.slot(head)).clone() };
        self.head_cursor.lazy_set(head);
        e
    }

    /// Claim up to `max` committed entries with one CAS and append them to
    /// `out`. Returns the number drained.
    pub fn remove_batch(&self, out: &mut Vec<E>, max: usize) -> usize {
        let mut spin = 0;
        loop {
            let head = self.head.load();
            let available = distance(self.tail.load(), head).max(0) as usize;
            let n = available.min(max);
            if n == 0 {
                return 0;
            }
            let claimed = head.wrapping_add(n as u64);
            if self.head_cursor.compare_exchange(head, claimed) {
                self.wait_for_commit(claimed);
                out.reserve(n);
                for i in 0..n as u64 {
                    // SAFETY: the batch claim covers every slot in the range.
                    if let Some(e) = unsafe { (*self.slot(head.wrapping_add(i))).take() } {
                        out.push(e);
                    }
                }
                self.head.lazy_set(claimed);
                return n;
            }
            spin = progressive_yield(spin);
        }
    }

    /// Remove every element equal to `target`, compacting the ring.
    ///
    /// This claims both cursors, blocking all producers and consumers for an
    /// O(capacity) scan. It exists for interface compatibility; do not use
    /// it on a hot path.
    pub fn remove_item(&self, target: &E) -> bool
    where
        E: PartialEq,
    {
        let (head, tail) = self.claim_exclusive();
        let len = distance(tail, head).max(0) as u64;
        let mut removed = 0u64;
        for i in 0..len {
            // SAFETY: both cursors are claimed; no other thread can touch
            // any slot until they are restored.
            let matched = unsafe { (*self.slot(head.wrapping_add(i))).as_ref() } == Some(target);
            if matched {
                removed += 1;
                // Drop the match, then shift its predecessors one slot
                // toward it; the vacancy accumulates at the front where the
                // advanced head skips it.
                unsafe {
                    (*self.slot(head.wrapping_add(i))).take();
                    for j in (1..=i).rev() {
                        let shifted = (*self.slot(head.wrapping_add(j - 1))).take();
                        *self.slot(head.wrapping_add(j)) = shifted;
                    }
                }
            }
        }
        if removed > 0 {
            self.head_cursor.lazy_set(head.wrapping_add(removed));
            self.tail_cursor.lazy_set(tail);
            self.head.lazy_set(head.wrapping_add(removed));
            true
        } else {
            self.tail_cursor.lazy_set(tail);
            self.head_cursor.lazy_set(head);
            false
        }
    }

    /// Whether `target` is currently in the queue.
    ///
    /// Shares the exclusive section with [`remove_item`](Self::remove_item):
    /// the scan claims both cursors so the slots cannot change underneath it.
    pub fn contains(&self, target: &E) -> bool
    where
        E: PartialEq,
    {
        let (head, tail) = self.claim_exclusive();
        let len = distance(tail, head).max(0) as u64;
        let mut found = false;
        for i in 0..len {
            // SAFETY: exclusive section; see `claim_exclusive`.
            if unsafe { (*self.slot(head.wrapping_add(i))).as_ref() } == Some(target) {
                found = true;
                break;
            }
        }
        self.tail_cursor.lazy_set(tail);
        self.head_cursor.lazy_set(head);
        found
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

    /// Full-check against the cached head, refreshing the cache only when
    /// the queue looks full. Shared with the blocking adapter's not-full
    /// predicate.
    pub(crate) fn is_full_hint(&self) -> bool {
        self.is_full_at(self.tail.load())
    }

    pub(crate) fn is_empty_hint(&self) -> bool {
        self.is_empty()
    }

    fn is_full_at(&self, tail: u64) -> bool {
        let queue_start = tail.wrapping_sub(self.capacity as u64);
        if distance(self.head_cache.load_relaxed(), queue_start) > 0 {
            return false;
        }
        let head = self.head.load();
        self.head_cache.store_relaxed(head);
        distance(head, queue_start) <= 0
    }

    /// Spin until the committed `tail` has passed `position`, i.e. every
    /// claim below `position` has been published.
    fn wait_for_commit(&self, position: u64) {
        let mut spin = 0;
        while distance(self.tail.load(), position) < 0 {
            spin = progressive_yield(spin);
        }
    }

    /// Claim both cursors, blocking every producer and consumer until they
    /// are restored. Returns the committed `(head, tail)` pair.
    fn claim_exclusive(&self) -> (u64, u64) {
        let mut spin = 0;
        let head = loop {
            let head = self.head.load();
            if self.head_cursor.compare_exchange(head, head.wrapping_add(1)) {
                break head;
            }
            spin = progressive_yield(spin);
        };
        let mut spin = 0;
        let tail = loop {
            let tail = self.tail.load();
            if self.tail_cursor.compare_exchange(tail, tail.wrapping_add(1)) {
                break tail;
            }
            spin = progressive_yield(spin);
        };
        (head, tail)
    }
}
