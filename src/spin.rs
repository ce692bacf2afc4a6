//! Progressive spin escalation.
//!
//! Busy waits in this crate never spin flat out: they feed a per-call counter
//! through [`progressive_yield`], which escalates from pause hints through
//! short parks to cooperative yields as the wait drags on. No single call
//! sleeps for more than a few microseconds, so progress on the other side is
//! observed promptly.

use std::hint;
use std::thread;
use std::time::Duration;

/// Shortest park interval used while spinning or polling for a signal.
pub const PARK_TIMEOUT: Duration = Duration::from_nanos(50);

/// Spin count at which escalation tops out; beyond it every call yields and
/// the counter stops advancing.
pub const MAX_PROG_YIELD: u32 = 2000;

/// Advance one step along the escalation curve and return the new count.
///
/// - up to 500: pause hint only
/// - 500..1000: one short park in eight, otherwise pause
/// - 1000..2000: one cooperative yield in four, otherwise pause
/// - 2000 and beyond: cooperative yield, count capped
#[inline]
pub(crate) fn progressive_yield(n: u32) -> u32 {
    if n > 500 {
        if n < 1000 {
            if n & 0x7 == 0 {
                thread::park_timeout(PARK_TIMEOUT);
            } else {
                hint::spin_loop();
            }
        } else if n < MAX_PROG_YIELD {
            if n & 0x3 == 0 {
                thread::yield_now();
            } else {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
            return n;
        }
    } else {
        hint::spin_loop();
    }
    n + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_up_from_zero() {
        assert_eq!(progressive_yield(0), 1);
        assert_eq!(progressive_yield(499), 500);
        assert_eq!(progressive_yield(501), 502);
        assert_eq!(progressive_yield(1999), 2000);
    }

    #[test]
    fn caps_at_max_prog_yield() {
        assert_eq!(progressive_yield(MAX_PROG_YIELD), MAX_PROG_YIELD);
        assert_eq!(progressive_yield(MAX_PROG_YIELD + 1), MAX_PROG_YIELD + 1);
    }

    #[test]
    fn reaches_the_cap_in_bounded_steps() {
        let mut n = 0;
        for _ in 0..=MAX_PROG_YIELD {
            n = progressive_yield(n);
        }
        assert_eq!(n, MAX_PROG_YIELD);
    }
}
