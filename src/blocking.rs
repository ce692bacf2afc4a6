//! Blocking queue adapter.
//!
//! # Overview
//!
//! [`BlockingQueue`] wraps the split-cursor [`MpmcQueue`] with two wait
//! conditions - "not full" for producers, "not empty" for consumers - to
//! provide blocking `put`/`take` and timed `offer`/`poll` without touching
//! the lock-free fast path. Every producer operation signals `not_empty` and
//! every consumer operation signals `not_full`, unconditionally: the signal
//! is idempotent and O(1) when nobody is waiting, and signalling always is
//! what makes lost wake-ups recoverable.
//!
//! The wait primitive is chosen at construction: [`WaitStrategy::Parking`]
//! (default) trades CPU for latency, [`WaitStrategy::Condvar`] never spins.
//!
//! # Example
//!
//! ```
//! use flywheel::BlockingQueue;
//! use std::thread;
//!
//! let queue = BlockingQueue::new(2);
//! let consumer = {
//!     let queue = queue.clone();
//!     thread::spawn(move || queue.take().unwrap())
//! };
//! queue.put("job").unwrap();
//! assert_eq!(consumer.join().unwrap(), "job");
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use minstant::Instant;
use thiserror::Error;

use crate::mpmc::queue::MpmcQueue;
use crate::spin::PARK_TIMEOUT;
use crate::trace::debug;
use crate::wait::condvar::CondvarCondition;
use crate::wait::parking::ParkCondition;
use crate::wait::{Condition, InterruptState, Interrupted, wait_until};

/// Which wait/signal primitive backs the blocking operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// Spinning-leader waiter registry: lowest wake-up latency, higher CPU.
    #[default]
    Parking,
    /// Mutex/condvar backed: heavier wake-ups, no spinning waiters.
    Condvar,
}

/// A blocking enqueue gave up. The rejected element is returned to the
/// caller.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum PutError<E> {
    #[error("interrupted while waiting to enqueue")]
    Interrupted(E),
    #[error("timed out waiting to enqueue")]
    Timeout(E),
}

/// A blocking dequeue gave up.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum TakeError {
    #[error("interrupted while waiting to dequeue")]
    Interrupted,
    #[error("timed out waiting to dequeue")]
    Timeout,
}

/// `add` was called on a full queue. Carries the rejected element.
#[derive(Debug, PartialEq, Eq, Error)]
#[error("queue is full")]
pub struct FullError<E>(pub E);

/// `element` was called on an empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is empty")]
pub struct EmptyError;

struct Waiters {
    interrupt: InterruptState,
    not_full: Box<dyn Condition>,
    not_empty: Box<dyn Condition>,
}

/// Bounded blocking MPMC queue backed by the split-cursor ring.
///
/// Cloning is cheap and produces another handle to the same queue.
pub struct BlockingQueue<E> {
    ring: Arc<MpmcQueue<E>>,
    waiters: Arc<Waiters>,
}

impl<E> Clone for BlockingQueue<E> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            waiters: Arc::clone(&self.waiters),
        }
    }
}

impl<E: Send + 'static> BlockingQueue<E> {
    /// Create a queue with at least `capacity` slots (rounded up to a power
    /// of two, minimum 2), using the default parking wait strategy.
    pub fn new(capacity: usize) -> Self {
        Self::with_strategy(capacity, WaitStrategy::default())
    }

    /// Create a queue with an explicit wait strategy.
    pub fn with_strategy(capacity: usize, strategy: WaitStrategy) -> Self {
        let ring = Arc::new(MpmcQueue::new(capacity));
        let (not_full, not_empty): (Box<dyn Condition>, Box<dyn Condition>) = match strategy {
            WaitStrategy::Parking => {
                let full_ring = Arc::clone(&ring);
                let empty_ring = Arc::clone(&ring);
                (
                    Box::new(ParkCondition::new(move || full_ring.is_full_hint())),
                    Box::new(ParkCondition::new(move || empty_ring.is_empty_hint())),
                )
            }
            WaitStrategy::Condvar => {
                let full_ring = Arc::clone(&ring);
                let empty_ring = Arc::clone(&ring);
                (
                    Box::new(CondvarCondition::new(move || full_ring.is_full_hint())),
                    Box::new(CondvarCondition::new(move || empty_ring.is_empty_hint())),
                )
            }
        };
        Self {
            ring,
            waiters: Arc::new(Waiters {
                interrupt: InterruptState::default(),
                not_full,
                not_empty,
            }),
        }
    }

    /// Create a queue seeded with `elements`, in iteration order.
    ///
    /// If the seed exceeds the capacity, the oldest element is evicted for
    /// each overflowing one, so later seed elements win by wrapping.
    pub fn with_elements(capacity: usize, elements: impl IntoIterator<Item = E>) -> Self {
        let queue = Self::new(capacity);
        for element in elements {
            let mut element = element;
            loop {
                match queue.offer(element) {
                    Ok(()) => break,
                    Err(rejected) => {
                        queue.poll();
                        element = rejected;
                    }
                }
            }
        }
        queue
    }
}

impl<E> BlockingQueue<E> {
    /// Attempt to enqueue without blocking.
    ///
    /// # Errors
    ///
    /// Returns the element back when the queue is full. `not_empty` is
    /// signalled on both outcomes; a consumer may be waiting either way and
    /// the signal is idempotent.
    pub fn offer(&self, e: E) -> Result<(), E> {
        let result = self.ring.offer(e);
        self.waiters.not_empty.signal();
        result
    }

    /// Attempt to dequeue without blocking. `None` means empty.
    pub fn poll(&self) -> Option<E> {
        let e = self.ring.poll();
        self.waiters.not_full.signal();
        e
    }

    /// Non-destructive read of the head element.
    pub fn peek(&self) -> Option<E>
    where
        E: Clone,
    {
        self.ring.peek()
    }

    /// Enqueue, blocking until space is available.
    ///
    /// # Errors
    ///
    /// [`PutError::Interrupted`] when [`interrupt`](Self::interrupt) is
    /// observed; the element is returned to the caller.
    pub fn put(&self, e: E) -> Result<(), PutError<E>> {
        let mut e = e;
        loop {
            match self.offer(e) {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    if self.waiters.interrupt.consume() {
                        debug!("put interrupted while queue full");
                        return Err(PutError::Interrupted(rejected));
                    }
                    e = rejected;
                    thread::park_timeout(PARK_TIMEOUT);
                }
            }
        }
    }

    /// Dequeue, blocking until an element is available.
    ///
    /// # Errors
    ///
    /// [`TakeError::Interrupted`] when [`interrupt`](Self::interrupt) is
    /// observed.
    pub fn take(&self) -> Result<E, TakeError> {
        loop {
            if let Some(e) = self.poll() {
                return Ok(e);
            }
            if self.waiters.interrupt.consume() {
                debug!("take interrupted while queue empty");
                return Err(TakeError::Interrupted);
            }
            thread::park_timeout(PARK_TIMEOUT);
        }
    }

    /// Enqueue, waiting on the not-full condition up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`PutError::Timeout`] when the deadline passes,
    /// [`PutError::Interrupted`] on interrupt; both return the element.
    pub fn offer_timeout(&self, e: E, timeout: Duration) -> Result<(), PutError<E>> {
        let deadline = Instant::now() + timeout;
        let mut e = e;
        loop {
            match self.offer(e) {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    if Instant::now() > deadline {
                        return Err(PutError::Timeout(rejected));
                    }
                    match wait_until(
                        self.waiters.not_full.as_ref(),
                        deadline,
                        &self.waiters.interrupt,
                    ) {
                        Ok(true) => e = rejected,
                        Ok(false) => return Err(PutError::Timeout(rejected)),
                        Err(Interrupted) => return Err(PutError::Interrupted(rejected)),
                    }
                }
            }
        }
    }

    /// Dequeue, waiting on the not-empty condition up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`TakeError::Timeout`] when the deadline passes,
    /// [`TakeError::Interrupted`] on interrupt.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<E, TakeError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(e) = self.poll() {
                return Ok(e);
            }
            if Instant::now() > deadline {
                return Err(TakeError::Timeout);
            }
            match wait_until(
                self.waiters.not_empty.as_ref(),
                deadline,
                &self.waiters.interrupt,
            ) {
                Ok(true) => {}
                Ok(false) => return Err(TakeError::Timeout),
                Err(Interrupted) => return Err(TakeError::Interrupted),
            }
        }
    }

    /// Checked enqueue: like [`offer`](Self::offer) but full is an error.
    ///
    /// # Errors
    ///
    /// [`FullError`] carrying the rejected element.
    pub fn add(&self, e: E) -> Result<(), FullError<E>> {
        self.offer(e).map_err(FullError)
    }

    /// Checked peek: like [`peek`](Self::peek) but empty is an error.
    ///
    /// # Errors
    ///
    /// [`EmptyError`] when the queue is empty.
    pub fn element(&self) -> Result<E, EmptyError>
    where
        E: Clone,
    {
        self.peek().ok_or(EmptyError)
    }

    /// Drain every committed element into `sink`. Returns the number moved.
    pub fn drain_to(&self, sink: &mut Vec<E>) -> usize {
        self.drain_to_max(sink, self.len())
    }

    /// Drain up to `max` elements into `sink`. Returns the number moved.
    pub fn drain_to_max(&self, sink: &mut Vec<E>, max: usize) -> usize {
        let n = self.ring.remove_batch(sink, max);
        self.waiters.not_full.signal();
        n
    }

    /// Remove every element equal to `target`. O(capacity) and serializing;
    /// see [`MpmcQueue::remove_item`].
    pub fn remove_item(&self, target: &E) -> bool
    where
        E: PartialEq,
    {
        let removed = self.ring.remove_item(target);
        if removed {
            self.waiters.not_full.signal();
        }
        removed
    }

    /// Whether `target` is currently in the queue.
    pub fn contains(&self, target: &E) -> bool
    where
        E: PartialEq,
    {
        self.ring.contains(target)
    }

    /// Drain and discard everything.
    pub fn clear(&self) {
        self.ring.clear();
        self.waiters.not_full.signal();
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// The rounded power-of-two capacity.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Free slots remaining, as a racy snapshot.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }

    /// Post an interrupt request and wake the blocked operations so one of
    /// them observes it.
    ///
    /// The request is consumed by the first blocked `put`/`take`/timed
    /// operation that sees it, which then returns its `Interrupted` error;
    /// operations that are not blocked are unaffected.
    pub fn interrupt(&self) {
        debug!("interrupt requested");
        self.waiters.interrupt.request();
        self.waiters.not_full.signal();
        self.waiters.not_empty.signal();
    }
}
