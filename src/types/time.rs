//! Runtime time representation and clock sources.
//!
//! [`Time`] is a nanosecond count since the scheduler's origin. Under the
//! wall clock the origin is the instant the runtime started; under the
//! virtual clock it is zero and time advances only when the scheduler is
//! idle, which makes timer behavior fully deterministic in tests.

use core::fmt;
use std::cell::Cell;
use std::ops::Add;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A logical timestamp, in nanoseconds since the scheduler origin.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The origin instant.
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Builds a time from nanoseconds since the origin.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Builds a time from milliseconds since the origin.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Builds a time from seconds since the origin.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Nanoseconds since the origin.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Milliseconds since the origin (truncated).
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Adds a duration, saturating on overflow.
    #[must_use]
    pub fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)))
    }

    /// The duration from `earlier` to `self`, zero if `self` is not later.
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(f, "{}.{:03}s", self.0 / 1_000_000_000, (self.0 / 1_000_000) % 1000)
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

/// Where the scheduler reads the current time from.
#[derive(Debug, Clone)]
pub enum ClockSource {
    /// Wall-clock time, measured from the runtime's start instant.
    Wall {
        /// The instant that maps to [`Time::ZERO`].
        origin: Instant,
    },
    /// Virtual time, advanced explicitly by the scheduler's idle path.
    Virtual {
        /// Shared cell holding the current virtual time.
        now: Rc<Cell<Time>>,
    },
}

impl ClockSource {
    /// A wall clock with its origin at the current instant.
    #[must_use]
    pub fn wall() -> Self {
        Self::Wall {
            origin: Instant::now(),
        }
    }

    /// A virtual clock starting at [`Time::ZERO`].
    #[must_use]
    pub fn virtual_clock() -> Self {
        Self::Virtual {
            now: Rc::new(Cell::new(Time::ZERO)),
        }
    }

    /// The current time under this source.
    #[must_use]
    pub fn now(&self) -> Time {
        match self {
            Self::Wall { origin } => {
                Time::from_nanos(u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX))
            }
            Self::Virtual { now } => now.get(),
        }
    }

    /// Advances a virtual clock to `to`; no-op for the wall clock or when
    /// `to` is in the past.
    pub fn advance_to(&self, to: Time) {
        if let Self::Virtual { now } = self {
            if to > now.get() {
                now.set(to);
            }
        }
    }

    /// True for the virtual variant.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual { .. })
    }
}
