//! Fixed-point amounts.
//!
//! Scrip, quota units, costs and the world budget are all [`Amount`]s:
//! non-negative quantities with six decimal places, stored as integer
//! micro-units. Integer storage keeps cumulative sums exact, so a budget of
//! `0.10` is reached by two `0.05` charges and not missed by a rounding error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Micro-units per whole unit.
pub const MICROS_PER_UNIT: u64 = 1_000_000;

/// A non-negative fixed-point quantity (6 decimal places).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

/// Errors converting external values into an [`Amount`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AmountError {
    #[error("amount must not be negative: {0}")]
    Negative(f64),

    #[error("amount must be a finite number: {0}")]
    NotFinite(f64),

    #[error("amount overflows the representable range: {0}")]
    Overflow(f64),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Whole units (e.g. `Amount::whole(100)` scrip).
    pub const fn whole(units: u64) -> Self {
        Self(units.saturating_mul(MICROS_PER_UNIT))
    }

    /// Convert a decimal config value, rounding to the nearest micro-unit.
    pub fn from_f64(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::NotFinite(value));
        }
        if value < 0.0 {
            return Err(AmountError::Negative(value));
        }
        let micros = (value * MICROS_PER_UNIT as f64).round();
        if micros >= u64::MAX as f64 {
            return Err(AmountError::Overflow(value));
        }
        Ok(Self(micros as u64))
    }

    pub const fn micros(self) -> u64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_UNIT as f64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiply by an integer count (e.g. "blocks of 1000 tokens").
    pub fn saturating_mul(self, count: u64) -> Self {
        Self(self.0.saturating_mul(count))
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let whole = self.0 / MICROS_PER_UNIT;
        let frac = self.0 % MICROS_PER_UNIT;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let digits = format!("{:06}", frac);
        write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
    }
}

impl std::ops::Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, Amount::saturating_add)
    }
}
