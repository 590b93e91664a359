use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const DEFAULT_CURRENCY: &str = "GBP";

//--------------------------------------     MinorUnits       --------------------------------------------------------
/// A monetary amount in minor currency units (pence, cents). All ledger arithmetic happens on this type; the
/// two-decimal major-unit rendering only exists at the API boundary.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct MinorUnits(i64);

op!(binary MinorUnits, Add, add);
op!(binary MinorUnits, Sub, sub);
op!(inplace MinorUnits, SubAssign, sub_assign);
op!(unary MinorUnits, Neg, neg);

impl Mul<i64> for MinorUnits {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for MinorUnits {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Amount cannot be represented in minor units: {0}")]
pub struct MinorUnitsError(String);

impl From<i64> for MinorUnits {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for MinorUnits {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for MinorUnits {}

impl FromStr for MinorUnits {
    type Err = MinorUnitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_decimal_str(s)
    }
}

impl Display for MinorUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl MinorUnits {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn from_major(major: i64) -> Self {
        Self(major * 100)
    }

    /// Parses a two-decimal major-unit amount, e.g. "400.00" or "12.5". At most two decimal places are accepted;
    /// anything finer has no minor-unit representation.
    pub fn from_decimal_str(value: &str) -> Result<Self, MinorUnitsError> {
        let trimmed = value.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(MinorUnitsError(format!("'{value}' contains no digits")));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(MinorUnitsError(format!("'{value}' is not a decimal amount")));
        }
        if frac.len() > 2 {
            return Err(MinorUnitsError(format!("'{value}' has more than two decimal places")));
        }
        let whole = if whole.is_empty() {
            0i64
        } else {
            whole.parse::<i64>().map_err(|_| MinorUnitsError(format!("'{value}' is out of range")))?
        };
        let frac = match frac.len() {
            0 => 0i64,
            1 => frac.parse::<i64>().map_err(|_| MinorUnitsError(format!("'{value}' is out of range")))? * 10,
            _ => frac.parse::<i64>().map_err(|_| MinorUnitsError(format!("'{value}' is out of range")))?,
        };
        let minor = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| MinorUnitsError(format!("'{value}' is out of range")))?;
        Ok(Self(if negative { -minor } else { minor }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_decimal_amounts() {
        assert_eq!(MinorUnits::from_decimal_str("400.00").unwrap(), MinorUnits::from(40_000));
        assert_eq!(MinorUnits::from_decimal_str("400").unwrap(), MinorUnits::from(40_000));
        assert_eq!(MinorUnits::from_decimal_str("12.5").unwrap(), MinorUnits::from(1_250));
        assert_eq!(MinorUnits::from_decimal_str("0.07").unwrap(), MinorUnits::from(7));
        assert_eq!(MinorUnits::from_decimal_str("-3.10").unwrap(), MinorUnits::from(-310));
        assert_eq!(MinorUnits::from_decimal_str(" 1000.00 ").unwrap(), MinorUnits::from(100_000));
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert!(MinorUnits::from_decimal_str("").is_err());
        assert!(MinorUnits::from_decimal_str(".").is_err());
        assert!(MinorUnits::from_decimal_str("12.345").is_err());
        assert!(MinorUnits::from_decimal_str("1,000.00").is_err());
        assert!(MinorUnits::from_decimal_str("ten").is_err());
        assert!(MinorUnits::from_decimal_str("99999999999999999999").is_err());
    }

    #[test]
    fn renders_two_decimal_places() {
        assert_eq!(MinorUnits::from(40_000).to_string(), "400.00");
        assert_eq!(MinorUnits::from(7).to_string(), "0.07");
        assert_eq!(MinorUnits::from(-310).to_string(), "-3.10");
        assert_eq!(MinorUnits::default().to_string(), "0.00");
    }

    #[test]
    fn sums_and_subtracts() {
        let total: MinorUnits = [MinorUnits::from(100), MinorUnits::from(250)].into_iter().sum();
        assert_eq!(total, MinorUnits::from(350));
        assert_eq!(MinorUnits::from(1_000) - MinorUnits::from(400), MinorUnits::from(600));
    }
}
