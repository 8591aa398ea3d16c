//! Property-Based Test Generators
//!
//! Proptest strategies for ledger data that respect domain invariants:
//! amounts at ledger scale, non-empty user ids, ordered time windows.

use chrono::{DateTime, Duration, TimeZone, Utc};
use core_kernel::{Money, Rate, TimeRange, UserId};
use domain_ledger::{ChargeType, Order};
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Amounts in ten-thousandths, up to one million units either way
pub fn amount_minor_strategy() -> impl Strategy<Value = i64> {
    -10_000_000_000i64..10_000_000_000i64
}

/// Strictly positive amounts in ten-thousandths
pub fn positive_amount_minor_strategy() -> impl Strategy<Value = i64> {
    1i64..10_000_000_000i64
}

/// Signed Money values
pub fn money_strategy() -> impl Strategy<Value = Money> {
    amount_minor_strategy().prop_map(Money::from_minor)
}

/// Strictly positive Money values
pub fn positive_money_strategy() -> impl Strategy<Value = Money> {
    positive_amount_minor_strategy().prop_map(Money::from_minor)
}

/// Non-zero charge values within the default charge limit
pub fn charge_value_strategy() -> impl Strategy<Value = Money> {
    prop_oneof![
        (1i64..1_000_000_000i64).prop_map(Money::from_minor),
        (1i64..1_000_000_000i64).prop_map(|m| Money::from_minor(-m)),
    ]
}

/// Rates between 0% and 100% with four decimal places
pub fn rate_strategy() -> impl Strategy<Value = Rate> {
    (0u32..=10_000u32).prop_map(|n| Rate::new(Decimal::new(n as i64, 4)))
}

/// Every built-in charge type plus an unrecognised one
pub fn charge_type_strategy() -> impl Strategy<Value = ChargeType> {
    prop_oneof![
        Just(ChargeType::Money),
        Just(ChargeType::Bonus),
        Just(ChargeType::Transfer),
        Just(ChargeType::Consumption),
        Just(ChargeType::Coupon),
        "[a-z]{3,10}".prop_map(ChargeType::from),
    ]
}

pub fn user_id_strategy() -> impl Strategy<Value = UserId> {
    "[a-z]{3,8}-[0-9]{1,4}".prop_map(UserId::new)
}

/// Timestamps within 2024
pub fn timestamp_2024_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..365 * 24 * 60).prop_map(|minutes| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes))
}

/// Non-empty windows starting within 2024
pub fn time_range_strategy() -> impl Strategy<Value = TimeRange> {
    (timestamp_2024_strategy(), 1i64..90 * 24 * 60)
        .prop_map(|(start, minutes)| TimeRange::new(start, start + Duration::minutes(minutes)).unwrap())
}

/// Active hourly orders for one user with prices up to 100 per hour
pub fn hourly_orders_strategy(user_id: &str, max_orders: usize) -> impl Strategy<Value = Vec<Order>> {
    let user_id = user_id.to_string();
    proptest::collection::vec(1i64..1_000_000i64, 0..=max_orders).prop_map(move |prices| {
        prices
            .into_iter()
            .enumerate()
            .map(|(i, minor)| Order::hourly(format!("order-{i}"), user_id.clone(), Money::from_minor(minor)))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn positive_money_is_always_positive(money in positive_money_strategy()) {
            prop_assert!(money.is_positive());
        }

        #[test]
        fn charge_values_are_non_zero(value in charge_value_strategy()) {
            prop_assert!(!value.is_zero());
        }

        #[test]
        fn rate_is_a_fraction(rate in rate_strategy()) {
            prop_assert!(rate.as_decimal() >= Decimal::ZERO);
            prop_assert!(rate.as_decimal() <= Decimal::ONE);
        }

        #[test]
        fn time_range_end_after_start(range in time_range_strategy()) {
            prop_assert!(range.end() > range.start());
        }

        #[test]
        fn hourly_orders_are_active(orders in hourly_orders_strategy("tenant-1", 5)) {
            prop_assert!(orders.len() <= 5);
            prop_assert!(orders.iter().all(|o| o.is_active_hourly() && o.unit_price.is_positive()));
        }
    }
}
