use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A monetary amount, always normalized to exactly two fractional digits
/// using round-half-up. Every construction path goes through [`Money::new`]:
/// arithmetic results, user input, serde, and values read back from storage.
/// That makes it the single rounding policy in the system, so equality
/// comparisons and persisted values never drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Construct a normalized amount from a decimal.
    pub fn new(amount: Decimal) -> Self {
        let mut normalized =
            amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        normalized.rescale(2);
        Money(normalized)
    }

    pub fn zero() -> Self {
        Money::new(Decimal::ZERO)
    }

    /// The underlying decimal, scale 2.
    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn subtract(&self, other: Money) -> Money {
        Money::new(self.0 - other.0)
    }

    pub fn negate(&self) -> Money {
        Money::new(-self.0)
    }

    pub fn add(&self, other: Money) -> Money {
        Money::new(self.0 + other.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Money::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    /// Parse a decimal string into a normalized amount.
    /// Example: "50" -> 50.00, "12.345" -> 12.35 (half-up)
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let amount = Decimal::from_str(input.trim())
            .map_err(|_| MoneyError::InvalidAmount(input.to_string()))?;
        Ok(Money::new(amount))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    InvalidAmount(String),
}

impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoneyError::InvalidAmount(input) => write!(f, "invalid amount: {}", input),
        }
    }
}

impl std::error::Error for MoneyError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    #[test]
    fn test_normalizes_to_two_decimal_places() {
        assert_eq!(money("50").to_string(), "50.00");
        assert_eq!(money("12.3").to_string(), "12.30");
        assert_eq!(money("12.34").to_string(), "12.34");
        assert_eq!(money("0").to_string(), "0.00");
    }

    #[test]
    fn test_rounds_half_up() {
        assert_eq!(money("10.005").to_string(), "10.01");
        assert_eq!(money("10.004").to_string(), "10.00");
        assert_eq!(money("10.015").to_string(), "10.02");
        // Half-up rounds away from zero for negative values too
        assert_eq!(money("-10.005").to_string(), "-10.01");
    }

    #[test]
    fn test_equality_ignores_input_scale() {
        assert_eq!(money("50"), money("50.00"));
        assert_eq!(money("50.004"), money("50.0001"));
        assert!(money("50.01") > money("50.00"));
    }

    #[test]
    fn test_subtract_renormalizes() {
        let result = money("1000.00").subtract(money("400.00"));
        assert_eq!(result, money("600.00"));
        assert_eq!(result.to_string(), "600.00");
    }

    #[test]
    fn test_negate() {
        assert_eq!(money("12.34").negate().to_string(), "-12.34");
        assert_eq!(money("-12.34").negate(), money("12.34"));
        assert_eq!(Money::zero().negate(), Money::zero());
    }

    #[test]
    fn test_sign_predicates() {
        assert!(money("0.01").is_positive());
        assert!(!money("0.00").is_positive());
        assert!(money("0.00").is_zero());
        assert!(money("-0.01").is_negative());
    }

    #[test]
    fn test_parse_invalid() {
        assert!("abc".parse::<Money>().is_err());
        assert!("12.34.56".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
    }

    #[test]
    fn test_serde_roundtrip_renormalizes() {
        let json = serde_json::to_string(&money("10.50")).unwrap();
        assert_eq!(json, "\"10.50\"");
        let back: Money = serde_json::from_str("\"10.005\"").unwrap();
        assert_eq!(back, money("10.01"));
    }
}
