//! Emulated time base and clock-domain conversions.
//!
//! All scheduling happens on a single absolute time axis measured in
//! attoseconds. Devices with different clock rates convert between their own
//! cycle counts and this axis through [`Clock`]; conversions are always done
//! from totals so that repeated slicing never accumulates rounding drift.

use std::fmt;

/// Number of attoseconds in one second.
pub const ATTOS_PER_SECOND: u128 = 1_000_000_000_000_000_000;
/// Number of attoseconds in one millisecond.
pub const ATTOS_PER_MILLI: u128 = ATTOS_PER_SECOND / 1_000;
/// Number of attoseconds in one microsecond.
pub const ATTOS_PER_MICRO: u128 = ATTOS_PER_SECOND / 1_000_000;
/// Number of attoseconds in one nanosecond.
pub const ATTOS_PER_NANO: u128 = ATTOS_PER_SECOND / 1_000_000_000;

/// A point on (or a span of) the emulated time axis, in attoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EmuTime(u128);

impl EmuTime {
    /// The origin of emulated time.
    pub const ZERO: Self = Self(0);
    /// A time that is never reached.
    pub const NEVER: Self = Self(u128::MAX);

    /// Creates a time from raw attoseconds.
    #[must_use]
    pub const fn from_attos(attos: u128) -> Self {
        Self(attos)
    }

    /// Creates a time from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs as u128 * ATTOS_PER_SECOND)
    }

    /// Creates a time from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis as u128 * ATTOS_PER_MILLI)
    }

    /// Creates a time from microseconds.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros as u128 * ATTOS_PER_MICRO)
    }

    /// Creates a time from nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos as u128 * ATTOS_PER_NANO)
    }

    /// Returns the raw attosecond count.
    #[must_use]
    pub const fn as_attos(self) -> u128 {
        self.0
    }

    /// Returns `true` for [`EmuTime::NEVER`].
    #[must_use]
    pub const fn is_never(self) -> bool {
        self.0 == u128::MAX
    }

    /// Returns `true` for [`EmuTime::ZERO`].
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Adds two times, saturating at [`EmuTime::NEVER`].
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Subtracts `rhs`, saturating at [`EmuTime::ZERO`].
    #[must_use]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Adds two times, returning `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Converts to floating-point seconds (lossy, for display only).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(self) -> f64 {
        if self.is_never() {
            return f64::INFINITY;
        }
        let whole = self.0 / ATTOS_PER_SECOND;
        let frac = self.0 % ATTOS_PER_SECOND;
        whole as f64 + frac as f64 / ATTOS_PER_SECOND as f64
    }

    /// Splits the time into whole seconds and the attosecond remainder.
    #[must_use]
    pub const fn split(self) -> (u128, u64) {
        (
            self.0 / ATTOS_PER_SECOND,
            (self.0 % ATTOS_PER_SECOND) as u64,
        )
    }
}

impl fmt::Display for EmuTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            return f.write_str("never");
        }
        let (secs, attos) = self.split();
        write!(f, "{secs}.{attos:018}s")
    }
}

/// A clock domain expressed as a whole-number frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Clock {
    hz: u32,
}

impl Clock {
    /// Creates a clock running at `hz` cycles per second.
    ///
    /// A zero frequency is allowed for unclocked devices; every conversion on
    /// such a clock yields zero cycles and [`EmuTime::NEVER`] periods.
    #[must_use]
    pub const fn from_hz(hz: u32) -> Self {
        Self { hz }
    }

    /// Returns the clock frequency in Hz.
    #[must_use]
    pub const fn hz(self) -> u32 {
        self.hz
    }

    /// Returns `true` when the clock is stopped (0 Hz).
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        self.hz == 0
    }

    /// Returns the duration of a single cycle (rounded down).
    #[must_use]
    pub const fn period(self) -> EmuTime {
        if self.hz == 0 {
            return EmuTime::NEVER;
        }
        EmuTime(ATTOS_PER_SECOND / self.hz as u128)
    }

    /// Converts a cycle count into a span of time.
    #[must_use]
    pub const fn cycles_to_time(self, cycles: u64) -> EmuTime {
        if self.hz == 0 {
            return EmuTime::NEVER;
        }
        EmuTime(cycles as u128 * ATTOS_PER_SECOND / self.hz as u128)
    }

    /// Converts a span of time into whole elapsed cycles (rounded down).
    #[must_use]
    pub const fn time_to_cycles(self, time: EmuTime) -> u64 {
        if self.hz == 0 {
            return 0;
        }
        if time.is_never() {
            return u64::MAX;
        }
        let cycles = time.0 / ATTOS_PER_SECOND * self.hz as u128
            + time.0 % ATTOS_PER_SECOND * self.hz as u128 / ATTOS_PER_SECOND;
        if cycles > u64::MAX as u128 {
            u64::MAX
        } else {
            cycles as u64
        }
    }

    /// Converts a span of time into cycles, rounding any partial cycle up.
    #[must_use]
    pub const fn time_to_cycles_ceil(self, time: EmuTime) -> u64 {
        let floor = self.time_to_cycles(time);
        if floor == u64::MAX || self.hz == 0 {
            return floor;
        }
        if self.cycles_to_time(floor).0 < time.0 {
            floor + 1
        } else {
            floor
        }
    }
}
