//! Unit tests for the Money module
//!
//! Tests cover quantization, arithmetic, comparison, parsing,
//! and period-count division.

use core_kernel::{Money, MoneyError, Rate, MONEY_SCALE};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

mod creation {
    use super::*;

    #[test]
    fn test_new_rounds_to_four_decimal_places() {
        let m = Money::new(dec!(100.123456789));
        assert_eq!(m.amount(), dec!(100.1235));
        assert_eq!(m.amount().scale(), MONEY_SCALE);
    }

    #[test]
    fn test_midpoint_rounds_away_from_zero() {
        assert_eq!(Money::new(dec!(2.00005)).amount(), dec!(2.0001));
        assert_eq!(Money::new(dec!(2.00015)).amount(), dec!(2.0002));
        assert_eq!(Money::new(dec!(-2.00005)).amount(), dec!(-2.0001));
    }

    #[test]
    fn test_from_units() {
        assert_eq!(Money::from_units(42).amount(), dec!(42));
    }

    #[test]
    fn test_zero_is_default() {
        assert_eq!(Money::default(), Money::ZERO);
        assert!(Money::zero().is_zero());
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_sum_of_many_small_charges_has_no_drift() {
        let total: Money = std::iter::repeat(Money::new(dec!(0.0001)))
            .take(100_000)
            .sum();
        assert_eq!(total.amount(), dec!(10));
    }

    #[test]
    fn test_times_quantity() {
        let per_hour = Money::new(dec!(2.0833));
        assert_eq!(per_hour.times(24).amount(), dec!(49.9992));
    }

    #[test]
    fn test_assign_ops() {
        let mut m = Money::from_units(10);
        m += Money::from_units(5);
        m -= Money::new(dec!(0.5));
        assert_eq!(m.amount(), dec!(14.5));
    }

    #[test]
    fn test_negation() {
        assert_eq!((-Money::from_units(3)).amount(), dec!(-3));
    }

    #[test]
    fn test_checked_add_overflow() {
        let big = Money::new(Decimal::MAX);
        assert_eq!(big.checked_add(&big), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_checked_times_and_sum_overflow() {
        let big = Money::new(Decimal::MAX);
        assert_eq!(big.checked_times(24), Err(MoneyError::Overflow));
        assert_eq!(Money::checked_sum([big, big]), Err(MoneyError::Overflow));

        assert_eq!(Money::from_units(2).checked_times(24), Ok(Money::from_units(48)));
        assert_eq!(
            Money::checked_sum([Money::from_units(1), Money::new(dec!(0.5))]),
            Ok(Money::new(dec!(1.5)))
        );
        assert_eq!(Money::checked_sum(Vec::new()), Ok(Money::ZERO));
    }

    #[test]
    fn test_divide_by_zero() {
        assert_eq!(
            Money::from_units(1).divide(Decimal::ZERO),
            Err(MoneyError::DivisionByZero)
        );
    }

    #[test]
    fn test_ratio_is_exact() {
        let balance = Money::from_units(100);
        let per_day = Money::new(dec!(49.9992));
        let ratio = balance.ratio(&per_day).unwrap();
        assert_eq!(ratio.floor(), dec!(2));
        assert_eq!(ratio.ceil(), dec!(3));
    }
}

mod comparison {
    use super::*;

    #[test]
    fn test_ordering_is_exact() {
        assert!(Money::new(dec!(0.0001)) > Money::ZERO);
        assert!(Money::new(dec!(-0.0001)) < Money::ZERO);
        assert_eq!(Money::new(dec!(1.00)), Money::new(dec!(1.0000)));
    }
}

mod formatting {
    use super::*;

    #[test]
    fn test_display_round_trips_through_parse() {
        let m = Money::new(dec!(-1234.5));
        let parsed: Money = m.to_string().parse().unwrap();
        assert_eq!(parsed, m);
    }

    #[test]
    fn test_invalid_string_rejected() {
        assert!(matches!("12,5".parse::<Money>(), Err(MoneyError::InvalidAmount(_))));
    }
}

mod rates {
    use super::*;

    #[test]
    fn test_rate_percentage_round_trip() {
        let rate = Rate::from_percentage(dec!(12.5));
        assert_eq!(rate.as_decimal(), dec!(0.125));
        assert_eq!(rate.as_percentage(), dec!(12.5));
    }

    #[test]
    fn test_rate_apply_quantizes() {
        let rate = Rate::new(dec!(0.033333));
        assert_eq!(rate.apply(&Money::from_units(10)).amount(), dec!(0.3333));
    }
}
