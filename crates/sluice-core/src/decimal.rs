//! Unsigned fixed-point decimal with 18 fractional digits.
//!
//! A [`Decimal`] is an integer scaled by [`DECIMAL_PRECISION`] (10^18) and
//! backed by a `u128`. All arithmetic is checked: overflow and underflow
//! surface as [`MathError::ArithmeticOverflow`], a zero divisor as
//! [`MathError::DivisionByZero`].
//!
//! Converting to an integer always truncates. Callers that must not lose
//! the truncated part use [`Decimal::to_integer_with_remainder`] and carry
//! the remainder forward.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{DECIMAL_PLACES, DECIMAL_PRECISION};
use crate::error::MathError;

/// Rounding direction for integer division.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    /// Truncate toward zero.
    Down,
    /// Round any non-zero remainder up.
    Up,
}

/// Compute `a * b / c` with the requested rounding.
///
/// The product is taken in `u128`; when it overflows, the division is split
/// as `a = q*c + r` so that `a*b/c = q*b + r*b/c`, which succeeds whenever the
/// true result fits.
pub fn mul_div(a: u128, b: u128, c: u128, rounding: Rounding) -> Result<u128, MathError> {
    if c == 0 {
        return Err(MathError::DivisionByZero);
    }

    let (quotient, inexact) = match a.checked_mul(b) {
        Some(product) => (product / c, product % c != 0),
        None => split_mul_div(a, b, c)
            .or_else(|| split_mul_div(b, a, c))
            .ok_or(MathError::ArithmeticOverflow)?,
    };

    match rounding {
        Rounding::Up if inexact => quotient.checked_add(1).ok_or(MathError::ArithmeticOverflow),
        _ => Ok(quotient),
    }
}

fn split_mul_div(a: u128, b: u128, c: u128) -> Option<(u128, bool)> {
    let whole = (a / c).checked_mul(b)?;
    let partial = (a % c).checked_mul(b)?;
    Some((whole.checked_add(partial / c)?, partial % c != 0))
}

/// Unsigned 18-decimal fixed-point number.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Decimal(u128);

impl Decimal {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(DECIMAL_PRECISION);

    /// Wrap an already-scaled value.
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// The scaled representation.
    pub const fn raw(self) -> u128 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `n` as a decimal.
    pub fn from_integer(n: u128) -> Result<Self, MathError> {
        n.checked_mul(DECIMAL_PRECISION)
            .map(Self)
            .ok_or(MathError::ArithmeticOverflow)
    }

    /// `num / den`, truncated to 18 digits.
    pub fn from_ratio(num: u128, den: u128) -> Result<Self, MathError> {
        mul_div(num, DECIMAL_PRECISION, den, Rounding::Down).map(Self)
    }

    /// Integer part, truncated.
    pub const fn floor(self) -> u128 {
        self.0 / DECIMAL_PRECISION
    }

    /// Smallest integer not below the value.
    pub const fn ceil(self) -> u128 {
        let whole = self.0 / DECIMAL_PRECISION;
        if self.0 % DECIMAL_PRECISION == 0 {
            whole
        } else {
            whole + 1
        }
    }

    /// Fractional part.
    pub const fn fract(self) -> Self {
        Self(self.0 % DECIMAL_PRECISION)
    }

    /// Split into the truncated integer and the fractional remainder.
    ///
    /// `Decimal::from_integer(whole) + remainder == self` always holds.
    pub const fn to_integer_with_remainder(self) -> (u128, Self) {
        (self.floor(), self.fract())
    }

    pub fn checked_add(self, other: Self) -> Result<Self, MathError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(MathError::ArithmeticOverflow)
    }

    pub fn checked_sub(self, other: Self) -> Result<Self, MathError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(MathError::ArithmeticOverflow)
    }

    /// `self * other`, truncated.
    pub fn checked_mul(self, other: Self) -> Result<Self, MathError> {
        mul_div(self.0, other.0, DECIMAL_PRECISION, Rounding::Down).map(Self)
    }

    /// `self / other`, truncated.
    pub fn checked_div(self, other: Self) -> Result<Self, MathError> {
        if other.is_zero() {
            return Err(MathError::DivisionByZero);
        }
        mul_div(self.0, DECIMAL_PRECISION, other.0, Rounding::Down).map(Self)
    }

    /// Exact product with an integer, kept in fixed point.
    pub fn mul_int(self, n: u128) -> Result<Self, MathError> {
        self.0
            .checked_mul(n)
            .map(Self)
            .ok_or(MathError::ArithmeticOverflow)
    }

    /// `floor(n * self)`.
    pub fn mul_floor(self, n: u128) -> Result<u128, MathError> {
        mul_div(n, self.0, DECIMAL_PRECISION, Rounding::Down)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.floor();
        let frac = self.fract().0;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{frac:0width$}", width = DECIMAL_PLACES);
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl FromStr for Decimal {
    type Err = MathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MathError::InvalidLiteral(s.to_string());
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > DECIMAL_PLACES || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_raw: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = DECIMAL_PLACES);
            padded.parse().map_err(|_| invalid())?
        };

        Self::from_integer(whole)?.checked_add(Self(frac_raw))
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
