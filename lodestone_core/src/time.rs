// Copyright 2026 the Lodestone Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic timestamps and the clock seam.
//!
//! [`Timestamp`] is a point on a millisecond timeline, either the host's
//! monotonic clock or the native engine's tracking clock. Which timeline a
//! value belongs to is determined by where it came from; [`ClockSync`]
//! converts native timestamps onto the host timeline.
//!
//! [`MonotonicClock`] is the injected source of "now" for the session. Hosts
//! implement it over their platform clock; tests use a manual clock.
//!
//! [`ClockSync`]: crate::clock::ClockSync

use core::fmt;
use core::ops::{Add, Sub};

/// A point in time in milliseconds.
#[derive(Clone, Copy, PartialEq, PartialOrd, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Timestamp(pub f64);

impl Timestamp {
    /// The zero timestamp.
    pub const ZERO: Self = Self(0.0);

    /// Returns the raw millisecond value.
    #[inline]
    #[must_use]
    pub const fn millis(self) -> f64 {
        self.0
    }

    /// Returns the signed number of milliseconds from `earlier` to `self`.
    #[inline]
    #[must_use]
    pub fn millis_since(self, earlier: Self) -> f64 {
        self.0 - earlier.0
    }

    /// Whether the value is finite.
    #[inline]
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }
}

impl Add<f64> for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, rhs: f64) -> Self {
        Self(self.0 + rhs)
    }
}

impl Sub<f64> for Timestamp {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: f64) -> Self {
        Self(self.0 - rhs)
    }
}

impl Sub for Timestamp {
    type Output = f64;

    #[inline]
    fn sub(self, rhs: Self) -> f64 {
        self.0 - rhs.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms)", self.0)
    }
}

/// A source of monotonic host time.
///
/// Implementations must never go backwards between calls.
pub trait MonotonicClock {
    /// Returns the current host time.
    fn now(&self) -> Timestamp;
}

impl<C: MonotonicClock + ?Sized> MonotonicClock for &C {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let t = Timestamp(1000.0);
        assert_eq!((t + 16.5).millis(), 1016.5);
        assert_eq!((t - 100.0).millis(), 900.0);
        assert_eq!(Timestamp(1200.0) - t, 200.0);
        assert_eq!(t.millis_since(Timestamp(1500.0)), -500.0);
    }

    #[test]
    fn ordering() {
        assert!(Timestamp(1.0) < Timestamp(2.0));
        assert!(!Timestamp(f64::NAN).is_finite());
    }

    #[test]
    fn clock_by_reference() {
        struct Fixed;
        impl MonotonicClock for Fixed {
            fn now(&self) -> Timestamp {
                Timestamp(42.0)
            }
        }
        fn read(c: impl MonotonicClock) -> Timestamp {
            c.now()
        }
        assert_eq!(read(&Fixed), Timestamp(42.0));
    }
}
