//! Bounded, lock-free, ring-buffer-backed concurrent queues.
//!
//! # Overview
//!
//! Two MPMC ring algorithms share one non-blocking contract:
//!
//! - [`MpmcQueue`] - split-cursor claim-then-commit ring in the style of the
//!   LMAX Disruptor; usually the faster choice
//! - [`SeqQueue`] - Vyukov-style ring where each slot carries its own gating
//!   sequence number
//!
//! [`BlockingQueue`] lifts the split-cursor ring into a blocking queue with
//! `put`/`take` and timed variants, built on the [`wait`] coordination layer:
//! a condvar-backed condition and a park-based waiter registry whose first
//! waiter spins while the rest park in a fixed slot ring.
//!
//! Capacities round up to a power of two (minimum 2). The slot array is
//! allocated once; nothing allocates on the lock-free paths. No fairness or
//! cross-producer FIFO is promised: per-producer order is preserved, and
//! ordering across producers follows claim order.
//!
//! # Example
//!
//! ```
//! use flywheel::BlockingQueue;
//! use std::thread;
//!
//! let queue = BlockingQueue::new(64);
//! let consumer = {
//!     let queue = queue.clone();
//!     thread::spawn(move || queue.take().unwrap())
//! };
//! queue.put(7u64).unwrap();
//! assert_eq!(consumer.join().unwrap(), 7);
//! ```

pub mod blocking;
pub mod mpmc;
pub mod trace;
pub mod wait;

mod cursor;
mod spin;

pub use blocking::{BlockingQueue, EmptyError, FullError, PutError, TakeError, WaitStrategy};
pub use mpmc::queue::MpmcQueue;
pub use mpmc::seq::SeqQueue;
pub use spin::{MAX_PROG_YIELD, PARK_TIMEOUT};
pub use wait::parking::MAX_WAITERS;
pub use wait::{Condition, InterruptState, Interrupted};
