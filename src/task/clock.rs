//! Monotonic absolute time for periodic scheduling.

use std::io;
use std::time::Duration;

use crate::sys;

pub(crate) const NSEC_PER_SEC: i64 = 1_000_000_000;

/// A point on the monotonic clock.
///
/// Invariant: `0 <= nsec < 1_000_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    sec: i64,
    nsec: i64,
}

impl Timespec {
    /// Build a timestamp, carrying excess nanoseconds into seconds.
    pub fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec: 0 }.add_nanos(nsec.max(0))
    }

    /// Current monotonic time.
    pub fn now() -> io::Result<Self> {
        let (sec, nsec) = sys::monotonic_now()?;
        Ok(Self { sec, nsec })
    }

    pub fn sec(&self) -> i64 {
        self.sec
    }

    pub fn nsec(&self) -> i64 {
        self.nsec
    }

    /// Advance by a non-negative number of nanoseconds.
    pub fn add_nanos(self, nanos: i64) -> Self {
        let nanos = nanos.max(0);
        let mut next = Self {
            sec: self.sec.saturating_add(nanos / NSEC_PER_SEC),
            nsec: self.nsec + nanos % NSEC_PER_SEC,
        };
        next.normalize();
        next
    }

    /// Advance by a duration, saturating at the end of representable time.
    pub fn add_duration(self, duration: Duration) -> Self {
        let secs = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX);
        Self {
            sec: self.sec.saturating_add(secs),
            nsec: self.nsec,
        }
        .add_nanos(duration.subsec_nanos() as i64)
    }

    fn normalize(&mut self) {
        while self.nsec >= NSEC_PER_SEC {
            self.nsec -= NSEC_PER_SEC;
            self.sec = self.sec.saturating_add(1);
        }
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Timespec) -> Duration {
        if *self <= earlier {
            return Duration::ZERO;
        }
        let (sec, nsec) = if self.nsec >= earlier.nsec {
            (self.sec - earlier.sec, self.nsec - earlier.nsec)
        } else {
            (self.sec - earlier.sec - 1, self.nsec + NSEC_PER_SEC - earlier.nsec)
        };
        Duration::new(sec as u64, nsec as u32)
    }

    /// Block the calling thread until this time is reached.
    ///
    /// Returns immediately for a time in the past. Signal interruptions are
    /// retried.
    pub fn sleep_until(&self) -> io::Result<()> {
        sys::sleep_until(self.sec, self.nsec)
    }
}
