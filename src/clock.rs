//! Monotonic time as an explicit value passed in by the host, never read
//! from a global clock inside the engine. This lets tests drive the
//! scheduler deterministically and lets the host (async runtime, simulator,
//! or a real NIC driver) choose its own time source.

use std::ops::{Add, Sub};

/// A point in time, expressed in nanoseconds since an arbitrary epoch chosen
/// by the host. Only differences between two `TimeNs` values are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeNs(pub u64);

impl TimeNs {
    pub const ZERO: TimeNs = TimeNs(0);

    pub fn from_millis(ms: u64) -> Self {
        TimeNs(ms.saturating_mul(1_000_000))
    }

    pub fn from_micros(us: u64) -> Self {
        TimeNs(us.saturating_mul(1_000))
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, rhs: TimeNs) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0.saturating_sub(rhs.0))
    }
}

impl Add<u64> for TimeNs {
    type Output = TimeNs;
    fn add(self, rhs: u64) -> TimeNs {
        TimeNs(self.0.saturating_add(rhs))
    }
}

impl Add<std::time::Duration> for TimeNs {
    type Output = TimeNs;
    fn add(self, rhs: std::time::Duration) -> TimeNs {
        TimeNs(self.0.saturating_add(rhs.as_nanos() as u64))
    }
}

impl Sub<TimeNs> for TimeNs {
    type Output = std::time::Duration;
    fn sub(self, rhs: TimeNs) -> std::time::Duration {
        self.saturating_sub(rhs)
    }
}

/// Injected capability for requesting a future dequeue attempt. The engine
/// never arms a real timer itself — it reports the next wake time and the
/// host (the `cake-bench` CLI, a simulator, a kernel qdisc watchdog) decides
/// how to actually sleep until then.
pub trait Watchdog {
    /// Request that the host call `dequeue` again no earlier than `at`.
    fn schedule_at(&mut self, at: TimeNs);
    /// Cancel any pending scheduled wakeup (e.g. the queue drained).
    fn cancel(&mut self);
}

/// A `Watchdog` that just remembers the last request, for tests and for the
/// CLI harness's own polling loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordingWatchdog {
    pub pending: Option<TimeNs>,
}

impl Watchdog for RecordingWatchdog {
    fn schedule_at(&mut self, at: TimeNs) {
        self.pending = Some(at);
    }

    fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_since_is_saturating() {
        let a = TimeNs(10);
        let b = TimeNs(20);
        assert_eq!(a.saturating_sub(b), std::time::Duration::ZERO);
        assert_eq!(b.saturating_sub(a), std::time::Duration::from_nanos(10));
    }

    #[test]
    fn recording_watchdog_tracks_last_request() {
        let mut wd = RecordingWatchdog::default();
        assert_eq!(wd.pending, None);
        wd.schedule_at(TimeNs(42));
        assert_eq!(wd.pending, Some(TimeNs(42)));
        wd.cancel();
        assert_eq!(wd.pending, None);
    }
}
