//! Mutex/condvar-backed wait condition.
//!
//! The straightforward implementation of [`Condition`]: waiters sleep on a
//! `Condvar`, `signal` takes the guard and notifies all of them. No fairness,
//! spurious wake-ups allowed. Heavier than the parking registry on the wake
//! path, but it never burns a core.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use minstant::Instant;

use crate::wait::{Condition, InterruptState, Interrupted};

/// Upper bound on a single condvar sleep so interrupt requests are observed
/// even when no signal arrives.
const WAIT_INTERVAL: Duration = Duration::from_millis(1);

/// [`Condition`] backed by a `Mutex<()>` and a `Condvar`.
pub struct CondvarCondition<F> {
    test: F,
    lock: Mutex<()>,
    cond: Condvar,
}

impl<F: Fn() -> bool + Send + Sync> CondvarCondition<F> {
    pub fn new(test: F) -> Self {
        Self {
            test,
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    fn wait_interval(
        &self,
        interval: Duration,
        interrupt: &InterruptState,
    ) -> Result<(), Interrupted> {
        if interrupt.consume() {
            return Err(Interrupted);
        }
        // The guard carries no data, so a poisoned lock is recoverable.
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .cond
            .wait_timeout(guard, interval)
            .unwrap_or_else(PoisonError::into_inner);
        if interrupt.consume() {
            return Err(Interrupted);
        }
        Ok(())
    }
}

impl<F: Fn() -> bool + Send + Sync> Condition for CondvarCondition<F> {
    fn test(&self) -> bool {
        (self.test)()
    }

    fn wait(&self, interrupt: &InterruptState) -> Result<(), Interrupted> {
        self.wait_interval(WAIT_INTERVAL, interrupt)
    }

    fn wait_deadline(
        &self,
        deadline: Instant,
        interrupt: &InterruptState,
    ) -> Result<(), Interrupted> {
        let now = Instant::now();
        if now > deadline {
            return Ok(());
        }
        self.wait_interval((deadline - now).min(WAIT_INTERVAL), interrupt)
    }

    fn signal(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }
}
