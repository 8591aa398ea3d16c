//! Top-up bonus computation

use tracing::debug;

use core_kernel::Money;

use crate::charge::ChargeType;
use crate::config::{BonusPolicy, LedgerConfig};

/// Computes the promotional credit earned by a top-up
#[derive(Debug, Clone)]
pub struct BonusCalculator {
    enabled: bool,
    policy: BonusPolicy,
}

impl BonusCalculator {
    pub fn new(enabled: bool, policy: BonusPolicy) -> Self {
        Self { enabled, policy }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.bonus_enabled, config.bonus_policy.clone())
    }

    /// Bonus earned by a charge of `value`
    ///
    /// Only top-ups earn a bonus: zero when bonuses are disabled and for
    /// bonus, transfer, consumption, coupon or non-positive charges. Never
    /// negative.
    pub fn bonus(&self, value: Money, charge_type: &ChargeType) -> Money {
        if !self.enabled || !charge_type.counts_as_top_up(value, false) {
            return Money::ZERO;
        }
        let bonus = self
            .policy
            .rate_for(value)
            .map(|rate| rate.apply(&value))
            .unwrap_or(Money::ZERO);
        debug!(%value, %bonus, "computed top-up bonus");
        if bonus.is_negative() {
            Money::ZERO
        } else {
            bonus
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Rate;
    use rust_decimal_macros::dec;

    fn calculator() -> BonusCalculator {
        BonusCalculator::new(
            true,
            BonusPolicy::default().tier(Money::from_units(100), Rate::new(dec!(0.1))),
        )
    }

    #[test]
    fn test_bonus_on_qualifying_top_up() {
        assert_eq!(calculator().bonus(Money::from_units(150), &ChargeType::Money), Money::from_units(15));
    }

    #[test]
    fn test_no_bonus_below_first_tier() {
        assert!(calculator().bonus(Money::from_units(99), &ChargeType::Money).is_zero());
    }

    #[test]
    fn test_no_bonus_on_bonus_or_debit() {
        let calc = calculator();
        assert!(calc.bonus(Money::from_units(500), &ChargeType::Bonus).is_zero());
        assert!(calc.bonus(Money::from_units(-500), &ChargeType::Money).is_zero());
        assert!(calc.bonus(Money::from_units(500), &ChargeType::Transfer).is_zero());
    }

    #[test]
    fn test_any_top_up_type_earns_bonus() {
        let calc = calculator();
        let alipay = ChargeType::Other("alipay".into());
        assert_eq!(calc.bonus(Money::from_units(200), &alipay), Money::from_units(20));
        assert!(calc.bonus(Money::from_units(200), &ChargeType::Coupon).is_zero());
        assert!(calc.bonus(Money::from_units(200), &ChargeType::Other("bonus".into())).is_zero());
    }

    #[test]
    fn test_disabled_calculator_yields_zero() {
        let calc = BonusCalculator::new(false, calculator().policy);
        assert!(calc.bonus(Money::from_units(500), &ChargeType::Money).is_zero());
    }

    #[test]
    fn test_bonus_is_quantized() {
        let calc = BonusCalculator::new(
            true,
            BonusPolicy::default().tier(Money::ZERO, Rate::new(dec!(0.033333))),
        );
        assert_eq!(calc.bonus(Money::new(dec!(1.5)), &ChargeType::Money).amount(), dec!(0.0500));
    }
}
