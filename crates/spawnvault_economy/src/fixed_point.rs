//! # Fixed-Point Currency
//!
//! **NO FLOATING POINT IN SELL TOTALS**
//!
//! Prices arrive from configuration as decimals (`2.5`), but every sum that
//! ends up in a deposit is computed on a `u64` with six implicit decimals.
//! Summing a hundred quotes in any order yields the same total, which the
//! audit journal relies on.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use crate::error::{EconomyError, EconomyResult};

/// Number of decimal places.
const DECIMAL_PLACES: u32 = 6;

/// The multiplier for 6 decimal places.
const MULTIPLIER: u64 = 10u64.pow(DECIMAL_PLACES);

/// Fixed-point decimal number with 6 decimal places.
///
/// Internally stores value * 1,000,000 as a u64.
///
/// # Range
///
/// - Minimum: 0.000000
/// - Maximum: 18,446,744,073,709.551615
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct FixedPoint(u64);

impl FixedPoint {
    /// Zero value.
    pub const ZERO: Self = Self(0);

    /// One unit (1.000000).
    pub const ONE: Self = Self(MULTIPLIER);

    /// Maximum representable value.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a fixed-point number from a whole number.
    #[inline]
    #[must_use]
    pub const fn from_whole(whole: u64) -> Self {
        Self(whole * MULTIPLIER)
    }

    /// Creates a fixed-point number from parts.
    ///
    /// # Example
    ///
    /// ```rust
    /// use spawnvault_economy::FixedPoint;
    /// let value = FixedPoint::from_parts(2, 500_000); // 2.5
    /// assert_eq!(value.to_string(), "2.500000");
    /// ```
    #[inline]
    #[must_use]
    pub const fn from_parts(whole: u64, decimal: u32) -> Self {
        Self(whole * MULTIPLIER + (decimal as u64 % MULTIPLIER))
    }

    /// Creates a fixed-point number from raw internal value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Converts a decimal read from configuration.
    ///
    /// Rounds to the nearest micro-unit. Returns `None` for negative,
    /// non-finite or out-of-range values.
    #[must_use]
    pub fn from_decimal(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let scaled = (value * MULTIPLIER as f64).round();
        if scaled > u64::MAX as f64 {
            return None;
        }
        Some(Self(scaled as u64))
    }

    /// Returns the raw internal value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the whole number part.
    #[inline]
    #[must_use]
    pub const fn whole(self) -> u64 {
        self.0 / MULTIPLIER
    }

    /// Returns the decimal part (0-999999).
    #[inline]
    #[must_use]
    pub const fn decimal(self) -> u32 {
        (self.0 % MULTIPLIER) as u32
    }

    /// Lossy conversion for display and gateways that speak floats.
    #[inline]
    #[must_use]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / MULTIPLIER as f64
    }

    /// Checked addition. Returns `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked multiplication by a quantity. Returns `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_mul_int(self, rhs: u64) -> Option<Self> {
        match self.0.checked_mul(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Returns true if this value is zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Safe addition with error on overflow.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::ArithmeticOverflow` if the addition would overflow.
    #[inline]
    pub fn safe_add(self, rhs: Self) -> EconomyResult<Self> {
        self.checked_add(rhs).ok_or(EconomyError::ArithmeticOverflow)
    }

    /// Unit price times quantity, with error on overflow.
    ///
    /// # Errors
    ///
    /// Returns `EconomyError::ArithmeticOverflow` if the product would overflow.
    #[inline]
    pub fn safe_mul_quantity(self, quantity: u64) -> EconomyResult<Self> {
        self.checked_mul_int(quantity).ok_or(EconomyError::ArithmeticOverflow)
    }
}

impl Add for FixedPoint {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for FixedPoint {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for FixedPoint {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Debug for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedPoint({}.{:06})", self.whole(), self.decimal())
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.whole(), self.decimal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_decimal_rounds() {
        let price = FixedPoint::from_decimal(2.5).unwrap();
        assert_eq!(price, FixedPoint::from_parts(2, 500_000));

        let tiny = FixedPoint::from_decimal(0.000_000_4).unwrap();
        assert!(tiny.is_zero());
    }

    #[test]
    fn test_from_decimal_rejects_negative() {
        assert!(FixedPoint::from_decimal(-1.0).is_none());
        assert!(FixedPoint::from_decimal(f64::NAN).is_none());
    }

    #[test]
    fn test_price_times_quantity() {
        let price = FixedPoint::from_parts(2, 500_000);
        let total = price.safe_mul_quantity(100).unwrap();
        assert_eq!(total, FixedPoint::from_whole(250));
        assert!((total.to_f64() - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_checked_overflow() {
        assert!(FixedPoint::MAX.checked_add(FixedPoint::ONE).is_none());
        assert_eq!(
            FixedPoint::MAX.safe_mul_quantity(2),
            Err(EconomyError::ArithmeticOverflow)
        );
    }

    #[test]
    fn test_display() {
        let value = FixedPoint::from_parts(42, 123_456);
        assert_eq!(format!("{value}"), "42.123456");
    }
}
