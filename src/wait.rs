//! Wait/signal coordination for the blocking queue surface.
//!
//! # Overview
//!
//! A [`Condition`] couples a domain predicate ("the queue is empty") with a
//! way to wait for it to clear and a way to wake whoever is waiting. Two
//! implementations are provided:
//!
//! - [`condvar::CondvarCondition`] - mutex/condvar backed; simple and correct
//! - [`parking::ParkCondition`] - a fixed-size registry of parked threads
//!   with a spinning leader; much lower wake-up latency at the cost of CPU
//!
//! Both tolerate lost and spurious wake-ups by design: callers loop on
//! `test()` after every wait, and every state-changing queue operation
//! signals.

pub mod condvar;
pub mod parking;

use std::sync::atomic::{AtomicBool, Ordering};

use minstant::Instant;
use thiserror::Error;

/// A blocking operation observed an interrupt request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("blocking operation interrupted")]
pub struct Interrupted;

/// A cooperative interrupt request shared by the blocking operations of one
/// queue.
///
/// The request is consumed by the first blocked operation that observes it,
/// so one `request` releases exactly one waiter. Observation latency is
/// bounded by the shortest park interval of the wait in progress.
#[derive(Debug, Default)]
pub struct InterruptState {
    flag: AtomicBool,
}

impl InterruptState {
    /// Post an interrupt request.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Consume a pending request, if any. The first observer wins.
    pub fn consume(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

/// A waitable domain predicate.
pub trait Condition: Send + Sync {
    /// True while the waiter should keep waiting (e.g. "queue is empty").
    fn test(&self) -> bool;

    /// Block until signalled or interrupted. Spurious returns are permitted;
    /// callers must re-check [`test`](Self::test).
    fn wait(&self, interrupt: &InterruptState) -> Result<(), Interrupted>;

    /// Block until signalled, interrupted, or `deadline` passes. Spurious
    /// returns are permitted.
    fn wait_deadline(&self, deadline: Instant, interrupt: &InterruptState)
    -> Result<(), Interrupted>;

    /// Wake every registered waiter. Cheap when nobody is waiting, and
    /// idempotent, so callers signal unconditionally.
    fn signal(&self);
}

/// Drive `condition` until its predicate clears or `deadline` passes.
///
/// Returns `Ok(true)` once the predicate is false, `Ok(false)` on timeout.
pub(crate) fn wait_until(
    condition: &dyn Condition,
    deadline: Instant,
    interrupt: &InterruptState,
) -> Result<bool, Interrupted> {
    while condition.test() {
        if Instant::now() > deadline {
            return Ok(false);
        }
        condition.wait_deadline(deadline, interrupt)?;
    }
    Ok(true)
}
