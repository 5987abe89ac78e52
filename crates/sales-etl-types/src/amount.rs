//! Fixed-point monetary amounts with two fractional digits.

use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest value a `DECIMAL(10,2)` warehouse column can hold, in hundredths.
pub const MAX_WAREHOUSE_CENTS: i64 = 9_999_999_999;

/// A monetary amount stored as an integer count of hundredths.
///
/// Renders as a plain decimal string (`"24.96"`, `"-0.50"`, `"5.00"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Round an exact decimal to two fractional digits, half away from zero.
    ///
    /// Returns `None` when the rounded value does not fit in `i64` hundredths.
    #[must_use]
    pub fn from_decimal_rounded(value: &BigDecimal) -> Option<Self> {
        let half = BigDecimal::new(5.into(), 1);
        let scaled = value.clone() * BigDecimal::from(100);
        let negative = scaled < BigDecimal::from(0);
        let magnitude = if negative { -scaled } else { scaled };
        let rounded = (magnitude + half).with_scale(0).to_i64()?;
        Some(Self(if negative { -rounded } else { rounded }))
    }

    /// Whether the value fits a `DECIMAL(10,2)` column.
    #[must_use]
    pub fn fits_warehouse(self) -> bool {
        self.0.abs() <= MAX_WAREHOUSE_CENTS
    }

    #[must_use]
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Failure to parse an [`Amount`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    #[error("'{0}' is not a decimal number")]
    NotNumeric(String),
    #[error("'{0}' is out of range")]
    OutOfRange(String),
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let decimal = BigDecimal::from_str(trimmed)
            .map_err(|_| AmountParseError::NotNumeric(trimmed.to_string()))?;
        Amount::from_decimal_rounded(&decimal)
            .ok_or_else(|| AmountParseError::OutOfRange(trimmed.to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn display_pads_fraction() {
        assert_eq!(Amount::from_cents(2496).to_string(), "24.96");
        assert_eq!(Amount::from_cents(500).to_string(), "5.00");
        assert_eq!(Amount::from_cents(7).to_string(), "0.07");
        assert_eq!(Amount::from_cents(-50).to_string(), "-0.50");
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(Amount::from_decimal_rounded(&dec("1.005")), Some(Amount::from_cents(101)));
        assert_eq!(Amount::from_decimal_rounded(&dec("1.004")), Some(Amount::from_cents(100)));
        assert_eq!(Amount::from_decimal_rounded(&dec("-1.005")), Some(Amount::from_cents(-101)));
        assert_eq!(Amount::from_decimal_rounded(&dec("19.99")), Some(Amount::from_cents(1999)));
    }

    #[test]
    fn parses_integer_and_decimal_text() {
        assert_eq!("5".parse::<Amount>().unwrap(), Amount::from_cents(500));
        assert_eq!(" 24.96 ".parse::<Amount>().unwrap(), Amount::from_cents(2496));
        assert!(matches!(
            "abc".parse::<Amount>(),
            Err(AmountParseError::NotNumeric(_))
        ));
    }

    #[test]
    fn warehouse_bounds() {
        assert!(Amount::from_cents(MAX_WAREHOUSE_CENTS).fits_warehouse());
        assert!(!Amount::from_cents(MAX_WAREHOUSE_CENTS + 1).fits_warehouse());
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&Amount::from_cents(1999)).unwrap();
        assert_eq!(json, "\"19.99\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Amount::from_cents(1999));
    }
}
