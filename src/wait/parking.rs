//! Park-based wait condition.
//!
//! # Overview
//!
//! A low-latency alternative to the condvar condition. The first thread to
//! arrive becomes the designated spinner: it busy-waits on the predicate
//! through the progressive-yield curve and never parks in a slot, so very
//! short waits skip the park/unpark round-trip entirely. Every later thread
//! publishes its handle into a fixed ring of waiter slots and parks in short
//! intervals; `signal` sweeps the ring, clearing slots and unparking.
//!
//! The ring is bounded at [`MAX_WAITERS`] slots regardless of contention -
//! excess waiters simply keep retrying the publication CAS. A relaxed cached
//! copy of the waiter count lets `signal` return without any shared-counter
//! traffic when nobody is waiting; the cache is a hint, and the slow path
//! always re-reads the true count.
//!
//! # Liveness
//!
//! A slot that holds a thread when a signal observes a non-zero waiter count
//! is cleared either by that signal or by the thread itself on
//! timeout/interrupt. Lost wake-ups are tolerated because waiters park in
//! short intervals and re-evaluate the predicate, and because every
//! state-changing queue operation signals.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::thread::{self, Thread};
use std::time::Duration;

use minstant::Instant;

use crate::cursor::{CACHE_LINE, Cursor};
use crate::spin::{MAX_PROG_YIELD, PARK_TIMEOUT, progressive_yield};
use crate::trace::trace;
use crate::wait::{Condition, InterruptState, Interrupted};

/// Number of live waiter slots. Excess waiters retry the publication CAS.
pub const MAX_WAITERS: usize = 8;

const WAITER_MASK: u64 = MAX_WAITERS as u64 - 1;

/// Guard slots flanking the live slots on both ends so the registry does not
/// false-share with neighbouring fields.
const SLOT_PAD: usize = CACHE_LINE / std::mem::size_of::<AtomicPtr<Thread>>();

const WAITER_SLOTS: usize = MAX_WAITERS + 2 * SLOT_PAD;

/// Park interval for a registered waiter with no deadline. Bounds the
/// latency of observing an interrupt or a lost wake-up.
const REGISTERED_PARK: Duration = Duration::from_millis(1);

/// [`Condition`] backed by a spinning leader and a fixed waiter-slot ring.
///
/// Slots hold raw pointers to boxed [`Thread`] handles. A waiter publishes
/// its box with a CAS from null; whichever side later CASes the slot back to
/// null (the signaller after unparking, or the waiter on its interrupt path)
/// owns the box and frees it. A waiter that leaves for any other reason
/// leaves its slot published; the next signal sweep reclaims it, and `Drop`
/// reclaims whatever remains.
pub struct ParkCondition<F> {
    test: F,
    /// Threads currently inside a wait.
    wait_count: Cursor,
    /// Relaxed approximation of `wait_count` for the signal fast path.
    wait_cache: Cursor,
    waiters: [AtomicPtr<Thread>; WAITER_SLOTS],
}

impl<F: Fn() -> bool + Send + Sync> ParkCondition<F> {
    pub fn new(test: F) -> Self {
        Self {
            test,
            wait_count: Cursor::new(0),
            wait_cache: Cursor::new(0),
            waiters: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
        }
    }

    #[inline]
    fn slot(sequence: u64) -> usize {
        (sequence & WAITER_MASK) as usize + SLOT_PAD
    }

    fn wait_inner(
        &self,
        deadline: Option<Instant>,
        interrupt: &InterruptState,
    ) -> Result<(), Interrupted> {
        let previous = self.wait_count.fetch_add(1);
        self.wait_cache.store_relaxed(previous.wrapping_add(1));
        let _count = CountGuard {
            count: &self.wait_count,
            cache: &self.wait_cache,
        };
        let mut wait_sequence = previous;

        if previous == 0 {
            // Designated spinner: no slot, no parking, just the escalation
            // curve until the predicate clears.
            let mut spin = 0;
            while (self.test)() {
                if interrupt.consume() {
                    return Err(Interrupted);
                }
                if let Some(deadline) = deadline
                    && Instant::now() > deadline
                {
                    return Ok(());
                }
                spin = progressive_yield(spin);
            }
            return Ok(());
        }

        // Publish this thread into a waiter slot.
        let handle = Box::into_raw(Box::new(thread::current()));
        let mut spin = 0;
        let slot = loop {
            if interrupt.consume() {
                // SAFETY: the box was never published; we still own it.
                unsafe { drop(Box::from_raw(handle)) };
                return Err(Interrupted);
            }
            if !(self.test)() {
                // SAFETY: the box was never published; we still own it.
                unsafe { drop(Box::from_raw(handle)) };
                return Ok(());
            }
            if let Some(deadline) = deadline
                && Instant::now() > deadline
            {
                // SAFETY: the box was never published; we still own it.
                unsafe { drop(Box::from_raw(handle)) };
                return Ok(());
            }
            let slot = Self::slot(wait_sequence);
            wait_sequence = wait_sequence.wrapping_add(1);
            if self.waiters[slot]
                .compare_exchange(ptr::null_mut(), handle, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break slot;
            }
            if spin < MAX_PROG_YIELD {
                spin = progressive_yield(spin);
            } else {
                thread::park_timeout(PARK_TIMEOUT * MAX_WAITERS as u32);
            }
        };

        // Registered: park until a signal reclaims the slot, the predicate
        // clears, the deadline passes, or an interrupt arrives.
        loop {
            if interrupt.consume() {
                self.deregister(slot, handle);
                trace!("parked waiter interrupted");
                return Err(Interrupted);
            }
            if !(self.test)() {
                break;
            }
            if self.waiters[slot].load(Ordering::Acquire) != handle {
                break;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now > deadline {
                        break;
                    }
                    thread::park_timeout((deadline - now) / 4);
                }
                None => thread::park_timeout(REGISTERED_PARK),
            }
        }
        Ok(())
    }

    /// Clear our own slot. If the CAS fails a signaller already claimed the
    /// slot and owns the box.
    fn deregister(&self, slot: usize, handle: *mut Thread) {
        if self.waiters[slot]
            .compare_exchange(handle, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // SAFETY: the CAS reclaimed exclusive ownership of the box.
            unsafe { drop(Box::from_raw(handle)) };
        }
    }

    #[cfg(test)]
    fn registered_waiters(&self) -> usize {
        self.waiters
            .iter()
            .filter(|slot| !slot.load(Ordering::Acquire).is_null())
            .count()
    }
}

impl<F: Fn() -> bool + Send + Sync> Condition for ParkCondition<F> {
    fn test(&self) -> bool {
        (self.test)()
    }

    fn wait(&self, interrupt: &InterruptState) -> Result<(), Interrupted> {
        self.wait_inner(None, interrupt)
    }

    fn wait_deadline(
        &self,
        deadline: Instant,
        interrupt: &InterruptState,
    ) -> Result<(), Interrupted> {
        self.wait_inner(Some(deadline), interrupt)
    }

    fn signal(&self) {
        if self.wait_cache.load_relaxed() == 0 {
            let count = self.wait_count.load();
            self.wait_cache.store_relaxed(count);
            if count == 0 {
                return;
            }
        }
        // One full sweep of the ring, ending early once the refreshed count
        // reaches zero.
        let mut sequence = 0u64;
        for _ in 0..MAX_WAITERS {
            let slot = Self::slot(sequence);
            sequence += 1;
            loop {
                let waiter = self.waiters[slot].load(Ordering::Acquire);
                if waiter.is_null() {
                    break;
                }
                if self.waiters[slot]
                    .compare_exchange(waiter, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // SAFETY: the CAS transferred ownership of the box.
                    let waiter = unsafe { Box::from_raw(waiter) };
                    waiter.unpark();
                    break;
                }
                // An interrupted waiter is mid-deregistration; re-read.
                thread::park_timeout(PARK_TIMEOUT);
            }
            let count = self.wait_count.load();
            self.wait_cache.store_relaxed(count);
            if count == 0 {
                return;
            }
        }
    }
}

impl<F> Drop for ParkCondition<F> {
    fn drop(&mut self) {
        for slot in &self.waiters {
            let waiter = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !waiter.is_null() {
                // SAFETY: exclusive access; any published box is still live.
                unsafe { drop(Box::from_raw(waiter)) };
            }
        }
    }
}

/// Decrements the live-waiter count and refreshes the cache on every exit
/// path from `wait_inner`.
struct CountGuard<'a> {
    count: &'a Cursor,
    cache: &'a Cursor,
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1);
        self.cache.store_relaxed(self.count.load());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn held_condition() -> (Arc<AtomicBool>, Arc<ParkCondition<impl Fn() -> bool>>) {
        let held = Arc::new(AtomicBool::new(true));
        let test_held = Arc::clone(&held);
        let condition = Arc::new(ParkCondition::new(move || {
            test_held.load(Ordering::Acquire)
        }));
        (held, condition)
    }

    #[test]
    fn signal_with_no_waiters_is_a_no_op() {
        let condition = ParkCondition::new(|| true);
        condition.signal();
        condition.signal();
        assert_eq!(condition.registered_waiters(), 0);
    }

    #[test]
    fn spinner_and_slot_waiters_wake_when_predicate_clears() {
        let (held, condition) = held_condition();
        let interrupt = Arc::new(InterruptState::default());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let condition = Arc::clone(&condition);
                let interrupt = Arc::clone(&interrupt);
                thread::spawn(move || {
                    while condition.test() {
                        condition.wait(&interrupt).unwrap();
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        held.store(false, Ordering::Release);
        condition.signal();
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn excess_waiters_beyond_the_ring_still_wake() {
        let (held, condition) = held_condition();
        let interrupt = Arc::new(InterruptState::default());

        let waiters: Vec<_> = (0..MAX_WAITERS + 2)
            .map(|_| {
                let condition = Arc::clone(&condition);
                let interrupt = Arc::clone(&interrupt);
                thread::spawn(move || {
                    while condition.test() {
                        condition.wait(&interrupt).unwrap();
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        held.store(false, Ordering::Release);
        for waiter in waiters {
            while !waiter.is_finished() {
                condition.signal();
                thread::sleep(Duration::from_millis(1));
            }
            waiter.join().unwrap();
        }
    }

    #[test]
    fn interrupt_releases_waiters_and_leaves_no_residue() {
        let (_held, condition) = held_condition();
        let interrupt = Arc::new(InterruptState::default());

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let condition = Arc::clone(&condition);
                let interrupt = Arc::clone(&interrupt);
                thread::spawn(move || condition.wait(&interrupt))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        for waiter in waiters {
            while !waiter.is_finished() {
                interrupt.request();
                thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(waiter.join().unwrap(), Err(Interrupted));
        }
        assert_eq!(condition.registered_waiters(), 0);
    }

    #[test]
    fn deadline_wait_returns_for_both_roles() {
        let (_held, condition) = held_condition();
        let interrupt = Arc::new(InterruptState::default());

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let condition = Arc::clone(&condition);
                let interrupt = Arc::clone(&interrupt);
                thread::spawn(move || {
                    let deadline = Instant::now() + Duration::from_millis(30);
                    condition.wait_deadline(deadline, &interrupt)
                })
            })
            .collect();

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(()));
        }
    }
}
