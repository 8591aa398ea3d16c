//! Balance runway projection
//!
//! Projects how long the current balance lasts at the combined price of the
//! account's active hourly orders. Results use sentinel values so callers
//! can render them without a separate status channel.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use core_kernel::{Money, MoneyError};

use crate::config::LedgerConfig;
use crate::order::Order;

/// No meaningful projection: estimator disabled, nothing billed, or beyond the cap
pub const NO_PROJECTION: i64 = -1;
/// The account is already owed
pub const ALREADY_OWED: i64 = -2;

const HOURS_PER_DAY: i64 = 24;

/// Daily spend and remaining whole days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerDayEstimate {
    pub price_per_day: Money,
    /// `-1` when nothing is billed
    pub remaining_days: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct BalanceEstimator {
    enabled: bool,
    cap_days: i64,
}

impl BalanceEstimator {
    pub fn new(enabled: bool, cap_days: i64) -> Self {
        Self { enabled, cap_days }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.estimator_enabled, config.estimator_cap_days)
    }

    /// Combined hourly price of the active hourly orders
    pub fn price_per_hour(orders: &[Order]) -> Result<Money, MoneyError> {
        Money::checked_sum(
            orders
                .iter()
                .filter(|order| order.is_active_hourly())
                .map(|order| order.unit_price),
        )
    }

    fn price_per_day(orders: &[Order]) -> Result<Money, MoneyError> {
        Self::price_per_hour(orders)?.checked_times(HOURS_PER_DAY)
    }

    /// Days until the balance runs out, rounded up, at least 1
    ///
    /// Returns [`ALREADY_OWED`] for a negative balance and [`NO_PROJECTION`]
    /// when disabled, when no order is billed, when the daily price
    /// overflows, or when the result exceeds the configured cap.
    pub fn days_to_owe(&self, balance: Money, orders: &[Order]) -> i64 {
        if !self.enabled {
            return NO_PROJECTION;
        }
        if balance.is_negative() {
            return ALREADY_OWED;
        }
        let Ok(per_day) = Self::price_per_day(orders) else {
            return NO_PROJECTION;
        };
        let Ok(ratio) = balance.ratio(&per_day) else {
            return NO_PROJECTION;
        };
        let days = ratio.ceil().to_i64().unwrap_or(i64::MAX).max(1);
        if days > self.cap_days {
            NO_PROJECTION
        } else {
            days
        }
    }

    /// Daily price and whole days remaining, rounded down
    ///
    /// Not capped; only the "nothing billed" case uses a sentinel. Fails
    /// with `Overflow` when the daily price is not representable.
    pub fn per_day(&self, balance: Money, orders: &[Order]) -> Result<PerDayEstimate, MoneyError> {
        let price_per_day = Self::price_per_day(orders)?;
        let remaining_days = match balance.ratio(&price_per_day) {
            Ok(ratio) => ratio.floor().to_i64().unwrap_or(i64::MAX),
            Err(_) => NO_PROJECTION,
        };
        Ok(PerDayEstimate {
            price_per_day,
            remaining_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn orders(hourly: &[Money]) -> Vec<Order> {
        hourly
            .iter()
            .enumerate()
            .map(|(i, price)| Order::hourly(format!("o-{i}"), "tenant-1", *price))
            .collect()
    }

    #[test]
    fn test_fifty_per_day_boundary() {
        let estimator = BalanceEstimator::new(true, 7);
        let burn = orders(&[Money::new(dec!(2.0833))]);
        // 2.0833 * 24 = 49.9992, just under fifty a day
        assert_eq!(estimator.per_day(Money::from_units(100), &burn).unwrap().remaining_days, 2);
        assert_eq!(estimator.days_to_owe(Money::from_units(100), &burn), 3);
    }

    #[test]
    fn test_cap_boundary() {
        let estimator = BalanceEstimator::new(true, 7);
        let one_per_day = orders(&[Money::new(dec!(1)).divide(dec!(24)).unwrap()]);
        // 1/24 quantizes to 0.0417 per hour, 1.0008 per day
        assert_eq!(estimator.days_to_owe(Money::from_units(7), &one_per_day), 7);
        assert_eq!(estimator.days_to_owe(Money::from_units(10), &one_per_day), NO_PROJECTION);

        let uncapped = BalanceEstimator::new(true, 30);
        assert_eq!(uncapped.days_to_owe(Money::from_units(10), &one_per_day), 10);
    }

    #[test]
    fn test_sentinels() {
        let estimator = BalanceEstimator::new(true, 7);
        let billed = orders(&[Money::from_units(1)]);

        assert_eq!(estimator.days_to_owe(Money::from_units(-1), &billed), ALREADY_OWED);
        assert_eq!(estimator.days_to_owe(Money::from_units(10), &[]), NO_PROJECTION);
        assert_eq!(estimator.days_to_owe(Money::from_units(10), &orders(&[Money::ZERO])), NO_PROJECTION);
        assert_eq!(BalanceEstimator::new(false, 7).days_to_owe(Money::from_units(10), &billed), NO_PROJECTION);
    }

    #[test]
    fn test_zero_balance_with_orders_is_one_day() {
        let estimator = BalanceEstimator::new(true, 7);
        assert_eq!(estimator.days_to_owe(Money::ZERO, &orders(&[Money::from_units(1)])), 1);
    }

    #[test]
    fn test_only_active_hourly_orders_count() {
        let mut monthly = Order::hourly("m", "tenant-1", Money::from_units(100));
        monthly.bill_method = crate::order::BillMethod::Month;
        let mut stopped = Order::hourly("s", "tenant-1", Money::from_units(100));
        stopped.status = crate::order::OrderStatus::Stopped;
        let active = Order::hourly("a", "tenant-1", Money::from_units(1));

        assert_eq!(BalanceEstimator::price_per_hour(&[monthly, stopped, active]), Ok(Money::from_units(1)));
    }

    #[test]
    fn test_per_day_floors() {
        let estimator = BalanceEstimator::new(true, 7);
        let estimate = estimator.per_day(Money::from_units(100), &orders(&[Money::from_units(1)])).unwrap();
        assert_eq!(estimate.price_per_day, Money::from_units(24));
        assert_eq!(estimate.remaining_days, 4);

        let empty = estimator.per_day(Money::from_units(100), &[]).unwrap();
        assert_eq!(empty, PerDayEstimate { price_per_day: Money::ZERO, remaining_days: NO_PROJECTION });
    }

    #[test]
    fn test_unrepresentable_price_has_no_projection() {
        let estimator = BalanceEstimator::new(true, 7);
        let huge = orders(&[Money::new(Decimal::MAX), Money::new(Decimal::MAX)]);
        assert_eq!(estimator.days_to_owe(Money::from_units(100), &huge), NO_PROJECTION);
        assert_eq!(estimator.per_day(Money::from_units(100), &huge), Err(MoneyError::Overflow));

        // A single price that only overflows once scaled to a day
        let hourly = orders(&[Money::new(Decimal::MAX / Decimal::from(2))]);
        assert_eq!(estimator.days_to_owe(Money::from_units(100), &hourly), NO_PROJECTION);
    }
}
