use std::{fmt, marker::PhantomData, time::Duration};

use rustix::time::{clock_gettime, ClockId, Timespec};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A kernel clock timestamps can be taken from
pub trait ClockSource {
    /// Id passed to `clock_gettime`
    const ID: ClockId;
}

/// Monotonic clock
///
/// Page-flip timestamps are reported on this clock by every driver advertising
/// `DRM_CAP_TIMESTAMP_MONOTONIC`, and sync_file timestamps always are.
#[derive(Debug)]
pub struct Monotonic;

impl ClockSource for Monotonic {
    const ID: ClockId = ClockId::Monotonic;
}

/// Reads the current time of the clock `Kind`
#[derive(Debug)]
pub struct Clock<Kind> {
    _kind: PhantomData<Kind>,
}

impl<Kind: ClockSource> Clock<Kind> {
    /// Initialize a new clock
    pub fn new() -> Self {
        Clock { _kind: PhantomData }
    }

    /// Returns the current time
    pub fn now(&self) -> Time<Kind> {
        clock_gettime(Kind::ID).into()
    }
}

impl<Kind: ClockSource> Default for Clock<Kind> {
    fn default() -> Self {
        Self::new()
    }
}

/// A point in time of the clock `Kind`, in nanoseconds since its epoch
pub struct Time<Kind> {
    nanos: u64,
    _kind: PhantomData<Kind>,
}

impl<Kind> Time<Kind> {
    /// Create a point in time from nanoseconds since the clock's epoch
    pub const fn from_nanos(nanos: u64) -> Self {
        Time {
            nanos,
            _kind: PhantomData,
        }
    }

    /// Nanoseconds since the clock's epoch
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Gets the duration between self and a later time
    ///
    /// Returns [`Duration::ZERO`] if `later` is actually earlier than `self`.
    pub fn duration_since(&self, later: Time<Kind>) -> Duration {
        Duration::from_nanos(later.nanos.saturating_sub(self.nanos))
    }

    /// Absolute distance between two points in time
    pub fn abs_diff(&self, other: Time<Kind>) -> Duration {
        Duration::from_nanos(self.nanos.abs_diff(other.nanos))
    }
}

impl<Kind> Clone for Time<Kind> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Kind> Copy for Time<Kind> {}

impl<Kind> PartialEq for Time<Kind> {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl<Kind> Eq for Time<Kind> {}

impl<Kind> PartialOrd for Time<Kind> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<Kind> Ord for Time<Kind> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl<Kind> fmt::Debug for Time<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09}s",
            self.nanos / NANOS_PER_SEC,
            self.nanos % NANOS_PER_SEC
        )
    }
}

impl<Kind> std::ops::Add<Duration> for Time<Kind> {
    type Output = Time<Kind>;

    fn add(self, rhs: Duration) -> Self::Output {
        Time::from_nanos(self.nanos.saturating_add(rhs.as_nanos() as u64))
    }
}

impl<Kind> From<Duration> for Time<Kind> {
    fn from(since_epoch: Duration) -> Self {
        Time::from_nanos(since_epoch.as_nanos() as u64)
    }
}

impl<Kind> From<Time<Kind>> for Duration {
    fn from(time: Time<Kind>) -> Self {
        Duration::from_nanos(time.nanos)
    }
}

impl<Kind> From<Timespec> for Time<Kind> {
    fn from(ts: Timespec) -> Self {
        // CLOCK_MONOTONIC never goes below its epoch
        let secs = ts.tv_sec.max(0) as u64;
        let nanos = ts.tv_nsec.clamp(0, NANOS_PER_SEC as i64 - 1) as u64;
        Time::from_nanos(secs * NANOS_PER_SEC + nanos)
    }
}
