//! Allocation pacing on absolute deadlines.
//!
//! Deadlines advance by a fixed interval from the previous *deadline*, never from
//! the moment a tick actually ran, so one late tick is caught up by the following
//! ones and the long-run rate holds. Between deadlines the loop sleeps in short
//! slices instead of spinning.

use std::time::{Duration, Instant};

/// Longest single sleep between deadlines. Short enough for rates in the
/// thousands per second, long enough to keep an idle loop off the CPU.
pub const YIELD_SLICE: Duration = Duration::from_micros(500);

/// Spacing between allocations at `rate` per second. A zero rate is treated as 1/s.
pub fn interval_for(rate: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(rate.max(1)))
}

/// `previous_deadline + 1/rate`.
pub fn next_deadline(previous_deadline: Instant, rate: u32) -> Instant {
    previous_deadline + interval_for(rate)
}

#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    next: Instant,
}

impl Pacer {
    /// The first allocation is due at `start`.
    pub fn new(rate: u32, start: Instant) -> Self {
        Self {
            interval: interval_for(rate),
            next: start,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Instant {
        self.next
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    /// Move to the next deadline after a tick ran.
    pub fn advance(&mut self) {
        self.next += self.interval;
    }

    /// Sleep toward the deadline for at most one `YIELD_SLICE`.
    pub fn pause(&self) {
        let now = Instant::now();
        if let Some(remaining) = self.next.checked_duration_since(now) {
            std::thread::sleep(remaining.min(YIELD_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_matches_rate() {
        assert_eq!(interval_for(1), Duration::from_secs(1));
        assert_eq!(interval_for(500), Duration::from_millis(2));
        assert_eq!(interval_for(1000), Duration::from_millis(1));
        assert_eq!(interval_for(0), Duration::from_secs(1));
    }

    #[test]
    fn deadlines_are_fixed_interval() {
        let t0 = Instant::now();
        let d1 = next_deadline(t0, 100);
        let d2 = next_deadline(d1, 100);
        assert_eq!(d2 - t0, Duration::from_millis(20));
    }

    #[test]
    fn late_tick_does_not_skew_schedule() {
        let t0 = Instant::now();
        let mut p = Pacer::new(1000, t0);
        assert!(p.is_due(t0));
        p.advance();
        // A tick that runs 5ms late still leaves the next deadline at t0 + 2ms.
        let late = t0 + Duration::from_millis(5);
        assert!(p.is_due(late));
        p.advance();
        assert_eq!(p.deadline(), t0 + Duration::from_millis(2));
        assert!(p.is_due(late));
    }

    #[test]
    fn pause_is_bounded_by_slice() {
        let p = Pacer::new(1, Instant::now() + Duration::from_secs(10));
        let before = Instant::now();
        p.pause();
        assert!(before.elapsed() < Duration::from_millis(200));
    }
}
