//! Monotonic time source and deadlines
//!
//! All timing is done in milliseconds. The clock is shared by all callers of the
//! [TransportManager](crate::TransportManager), so its methods take `&self`.
use fugit::{MillisDurationU32, TimerInstantU32};

/// Monotonic instant with millisecond resolution
pub type Instant = TimerInstantU32<1_000>;

/// Duration with millisecond resolution
pub type Duration = MillisDurationU32;

/// Polling interval used while waiting on hardware or on the module
pub(crate) const POLL_INTERVAL: Duration = Duration::from_ticks(1);

/// Monotonic clock and sleep primitive
pub trait Clock {
    /// Returns the current monotonic time
    fn now(&self) -> Instant;

    /// Suspends the calling thread for the given duration
    fn sleep(&self, duration: Duration);
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> Instant {
        T::now(self)
    }

    fn sleep(&self, duration: Duration) {
        T::sleep(self, duration)
    }
}

/// Point in time after which an operation gives up
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Starts a new deadline expiring `timeout` after now
    pub fn start<C: Clock>(clock: &C, timeout: Duration) -> Self {
        Self {
            start: clock.now(),
            timeout,
        }
    }

    /// Starts a new deadline based on a millisecond timeout
    pub fn start_ms<C: Clock>(clock: &C, timeout_ms: u32) -> Self {
        Self::start(clock, Duration::millis(timeout_ms))
    }

    /// Starts a new deadline expiring `timeout` after now, but not later than the limit
    pub fn start_within<C: Clock>(clock: &C, timeout: Duration, limit: Option<&Deadline>) -> Self {
        Self::start(clock, Self::bound(clock, timeout, limit))
    }

    /// Shortens the duration to the remaining time of the limit
    pub fn bound<C: Clock>(clock: &C, duration: Duration, limit: Option<&Deadline>) -> Duration {
        match limit {
            Some(limit) => {
                let remaining = limit.remaining(clock);
                if remaining < duration {
                    remaining
                } else {
                    duration
                }
            }
            None => duration,
        }
    }

    /// True if the deadline has passed
    pub fn is_expired<C: Clock>(&self, clock: &C) -> bool {
        match clock.now().checked_duration_since(self.start) {
            Some(elapsed) => elapsed >= self.timeout,
            None => false,
        }
    }

    /// Remaining time until expiry, zero if already expired
    pub fn remaining<C: Clock>(&self, clock: &C) -> Duration {
        let elapsed = clock.now().checked_duration_since(self.start).unwrap_or(Duration::from_ticks(0));
        self.timeout.checked_sub(elapsed).unwrap_or(Duration::from_ticks(0))
    }
}
