//! Money types with precise decimal arithmetic
//!
//! This module provides a type-safe representation of monetary values
//! using rust_decimal for precise calculations without floating-point errors.
//!
//! Every amount is quantized to [`MONEY_SCALE`] fractional digits using
//! round-half-up (midpoint away from zero). Quantization happens on
//! construction and after every arithmetic operation, so a `Money` value
//! never carries more precision than the ledger stores.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits kept for every monetary amount
pub const MONEY_SCALE: u32 = 4;

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Overflow during calculation")]
    Overflow,
}

fn quantize(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// A quantized monetary amount
///
/// The ledger runs in a single settlement currency, so `Money` carries no
/// currency code. Amounts are signed: negative values are debits or owed
/// balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money {
    amount: Decimal,
}

impl Money {
    /// The zero amount
    pub const ZERO: Money = Money { amount: Decimal::ZERO };

    /// Creates a new Money value, quantizing to the ledger scale
    pub fn new(amount: Decimal) -> Self {
        Self {
            amount: quantize(amount),
        }
    }

    /// Creates Money from an integer amount in ten-thousandths
    pub fn from_minor(minor_units: i64) -> Self {
        Self::new(Decimal::new(minor_units, MONEY_SCALE))
    }

    /// Creates Money from a whole number of currency units
    pub fn from_units(units: i64) -> Self {
        Self::new(Decimal::from(units))
    }

    /// Creates a zero amount
    pub fn zero() -> Self {
        Self::ZERO
    }

    /// Returns the amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Returns true if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Returns true if the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }

    /// Returns true if the amount is strictly negative
    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Returns the absolute value
    pub fn abs(&self) -> Self {
        Self {
            amount: self.amount.abs(),
        }
    }

    /// Checked addition that reports overflow instead of panicking
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.amount
            .checked_add(other.amount)
            .map(Self::new)
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction that reports overflow instead of panicking
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.amount
            .checked_sub(other.amount)
            .map(Self::new)
            .ok_or(MoneyError::Overflow)
    }

    /// Multiplies by a decimal factor (e.g., for rate calculations)
    pub fn multiply(&self, factor: Decimal) -> Self {
        Self::new(self.amount * factor)
    }

    /// Multiplies by an integer quantity of billing units
    pub fn times(&self, quantity: i64) -> Self {
        Self::new(self.amount * Decimal::from(quantity))
    }

    /// Checked multiplication by an integer quantity
    pub fn checked_times(&self, quantity: i64) -> Result<Money, MoneyError> {
        self.amount
            .checked_mul(Decimal::from(quantity))
            .map(Self::new)
            .ok_or(MoneyError::Overflow)
    }

    /// Sums amounts, reporting overflow instead of panicking
    pub fn checked_sum<I>(amounts: I) -> Result<Money, MoneyError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(&m))
    }

    /// Divides by a scalar
    pub fn divide(&self, divisor: Decimal) -> Result<Self, MoneyError> {
        if divisor.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        self.amount
            .checked_div(divisor)
            .map(Self::new)
            .ok_or(MoneyError::Overflow)
    }

    /// Returns the exact, unquantized ratio `self / other`
    ///
    /// Used to turn a balance and a per-period price into a period count;
    /// callers pick the rounding direction.
    pub fn ratio(&self, other: &Money) -> Result<Decimal, MoneyError> {
        if other.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        self.amount
            .checked_div(other.amount)
            .ok_or(MoneyError::Overflow)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Decimal {
        money.amount
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .map(Self::new)
            .map_err(|_| MoneyError::InvalidAmount(s.to_string()))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.prec$}", self.amount, prec = MONEY_SCALE as usize)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.amount + other.amount)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.amount - other.amount)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Self) {
        *self = *self - other;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self { amount: -self.amount }
    }
}

impl Mul<Decimal> for Money {
    type Output = Self;

    fn mul(self, factor: Decimal) -> Self {
        self.multiply(factor)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    fn mul(self, quantity: i64) -> Self {
        self.times(quantity)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

/// Represents a percentage rate (e.g., a bonus fraction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate {
    /// The rate as a decimal (e.g., 0.05 for 5%)
    value: Decimal,
}

impl Rate {
    /// Creates a rate from a decimal value (e.g., 0.05 for 5%)
    pub fn new(value: Decimal) -> Self {
        Self { value }
    }

    /// Creates a rate from a percentage (e.g., 5.0 for 5%)
    pub fn from_percentage(percentage: Decimal) -> Self {
        Self {
            value: percentage / dec!(100),
        }
    }

    /// Returns the rate as a decimal
    pub fn as_decimal(&self) -> Decimal {
        self.value
    }

    /// Returns the rate as a percentage
    pub fn as_percentage(&self) -> Decimal {
        self.value * dec!(100)
    }

    /// Applies this rate to a money amount
    pub fn apply(&self, money: &Money) -> Money {
        money.multiply(self.value)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage().round_dp(4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_creation_quantizes() {
        let m = Money::new(dec!(100.123456));
        assert_eq!(m.amount(), dec!(100.1235));
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(Money::new(dec!(0.00005)).amount(), dec!(0.0001));
        assert_eq!(Money::new(dec!(-0.00005)).amount(), dec!(-0.0001));
        assert_eq!(Money::new(dec!(0.00004)).amount(), dec!(0.0000));
    }

    #[test]
    fn test_money_from_minor() {
        let m = Money::from_minor(1_005_000);
        assert_eq!(m.amount(), dec!(100.50));
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::new(dec!(100.00));
        let b = Money::new(dec!(50.00));

        assert_eq!((a + b).amount(), dec!(150.00));
        assert_eq!((a - b).amount(), dec!(50.00));
        assert_eq!((b - a).amount(), dec!(-50.00));
        assert_eq!((a * 3).amount(), dec!(300));
    }

    #[test]
    fn test_display_has_four_digits() {
        assert_eq!(Money::from_units(100).to_string(), "100.0000");
        assert_eq!(Money::new(dec!(-2.5)).to_string(), "-2.5000");
    }

    #[test]
    fn test_parse() {
        let m: Money = "12.34567".parse().unwrap();
        assert_eq!(m.amount(), dec!(12.3457));
        assert!(matches!("abc".parse::<Money>(), Err(MoneyError::InvalidAmount(_))));
    }

    #[test]
    fn test_ratio() {
        let balance = Money::from_units(100);
        let per_day = Money::from_units(50);
        assert_eq!(balance.ratio(&per_day).unwrap(), dec!(2));
        assert_eq!(balance.ratio(&Money::ZERO), Err(MoneyError::DivisionByZero));
    }

    #[test]
    fn test_sign_predicates() {
        assert!(Money::from_units(1).is_positive());
        assert!(Money::from_units(-1).is_negative());
        assert!(!Money::ZERO.is_negative());
        assert!(!Money::ZERO.is_positive());
    }

    #[test]
    fn test_serde_quantizes_on_the_way_in() {
        let m: Money = serde_json::from_str("\"1.00009\"").unwrap();
        assert_eq!(m.amount(), dec!(1.0001));
    }

    #[test]
    fn test_rate_application() {
        let rate = Rate::from_percentage(dec!(5.0));
        let amount = Money::new(dec!(1000.00));

        let bonus = rate.apply(&amount);
        assert_eq!(bonus.amount(), dec!(50.00));
    }
}
