//! Timebases and native-tick timestamps.

use std::cmp::Ordering;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Duration of one native clock tick, expressed as `multiplier / divider` ns.
///
/// A rational form keeps 75 MHz clocks (1000/75 ns) exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeBase {
    /// Numerator of the tick duration in nanoseconds.
    pub multiplier: u32,
    /// Denominator of the tick duration in nanoseconds.
    pub divider: u32,
}

impl Default for TimeBase {
    fn default() -> Self {
        Self {
            multiplier: 1,
            divider: 1,
        }
    }
}

impl TimeBase {
    /// Creates a validated timebase.
    ///
    /// # Errors
    /// Returns an error if either term is zero.
    pub fn new(multiplier: u32, divider: u32) -> Result<Self> {
        if multiplier == 0 || divider == 0 {
            return Err(Error::InvalidTimebase {
                multiplier,
                divider,
            });
        }
        Ok(Self {
            multiplier,
            divider,
        })
    }

    /// Tick duration of the Pixie-4 75 MHz clock.
    #[must_use]
    pub fn pixie4() -> Self {
        Self {
            multiplier: 1000,
            divider: 75,
        }
    }

    /// Duration of one tick in nanoseconds.
    #[must_use]
    pub fn tick_ns(&self) -> f64 {
        f64::from(self.multiplier) / f64::from(self.divider)
    }

    /// Converts a duration in nanoseconds to the nearest whole tick count.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn ticks_for_ns(&self, ns: f64) -> i64 {
        (ns * f64::from(self.divider) / f64::from(self.multiplier)).round() as i64
    }
}

/// Native tick count bound to the timebase it was counted in.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TimeStamp {
    native: u64,
    timebase: TimeBase,
}

impl TimeStamp {
    /// Creates a timestamp of `native` ticks.
    #[must_use]
    pub fn new(native: u64, timebase: TimeBase) -> Self {
        Self { native, timebase }
    }

    /// Returns a timestamp with the same timebase and a different tick count.
    #[must_use]
    pub fn make(&self, native: u64) -> Self {
        Self {
            native,
            timebase: self.timebase,
        }
    }

    /// Raw tick count.
    #[inline]
    #[must_use]
    pub fn native(&self) -> u64 {
        self.native
    }

    /// Timebase the ticks are counted in.
    #[inline]
    #[must_use]
    pub fn timebase(&self) -> TimeBase {
        self.timebase
    }

    /// Timestamp in nanoseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_nanoseconds(&self) -> f64 {
        self.native as f64 * self.timebase.tick_ns()
    }

    /// Shifts the timestamp by `ns` nanoseconds, rounded to whole ticks.
    ///
    /// Negative delays saturate at zero.
    pub fn delay(&mut self, ns: f64) {
        let ticks = self.timebase.ticks_for_ns(ns);
        self.native = if ticks >= 0 {
            self.native.saturating_add(ticks.unsigned_abs())
        } else {
            self.native.saturating_sub(ticks.unsigned_abs())
        };
    }

    /// Elapsed nanoseconds from `earlier` to `self` (negative if `self` is earlier).
    #[must_use]
    pub fn ns_since(&self, earlier: &TimeStamp) -> f64 {
        self.to_nanoseconds() - earlier.to_nanoseconds()
    }

    // native * multiplier / divider, cross-multiplied against the other timebase
    fn scaled(&self, other: &TimeBase) -> u128 {
        u128::from(self.native) * u128::from(self.timebase.multiplier) * u128::from(other.divider)
    }
}

impl PartialEq for TimeStamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeStamp {}

impl PartialOrd for TimeStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.timebase == other.timebase {
            self.native.cmp(&other.native)
        } else {
            self.scaled(&other.timebase)
                .cmp(&other.scaled(&self.timebase))
        }
    }
}
