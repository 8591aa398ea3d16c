//! Ledger policy configuration
//!
//! All knobs are plain data so they can be loaded from files or environment
//! by the runtime and swapped per test.

use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use core_kernel::{CoreError, Money, Rate};

/// A bonus tier: top-ups of at least `min_value` earn `rate` of the value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusTier {
    pub min_value: Money,
    pub rate: Rate,
}

/// Piecewise bonus schedule
///
/// The tier with the highest `min_value` not exceeding the top-up applies.
/// A top-up below every tier earns nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusPolicy {
    pub tiers: Vec<BonusTier>,
}

impl BonusPolicy {
    pub fn tier(mut self, min_value: Money, rate: Rate) -> Self {
        self.tiers.push(BonusTier { min_value, rate });
        self
    }

    /// Rate applicable to a top-up of `value`
    pub fn rate_for(&self, value: Money) -> Option<Rate> {
        self.tiers
            .iter()
            .filter(|tier| tier.min_value <= value)
            .max_by_key(|tier| tier.min_value)
            .map(|tier| tier.rate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub bonus_enabled: bool,
    pub bonus_policy: BonusPolicy,
    pub referral_enabled: bool,
    /// Smallest first top-up that earns the inviter a reward
    pub min_charge_for_referral: Money,
    pub reward_value: Money,
    pub reward_remarks: String,
    /// Maximum absolute charge value per caller role
    pub charge_value_limit_by_role: HashMap<String, Money>,
    /// Bound for callers holding none of the limited roles
    pub default_charge_value_limit: Money,
    pub estimator_enabled: bool,
    /// Projections further out than this are reported as "no projection"
    pub estimator_cap_days: i64,
    /// Whether a non-bonus debit counts as the account's first charge
    pub debit_counts_as_first_charge: bool,
    pub notify_account_charged: bool,
    /// Read displayed balances from the external provider
    pub external_balance_enabled: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let mut charge_value_limit_by_role = HashMap::new();
        charge_value_limit_by_role.insert("support".to_string(), Money::from_units(200));
        charge_value_limit_by_role.insert("accountant".to_string(), Money::from_units(100_000));

        Self {
            bonus_enabled: false,
            bonus_policy: BonusPolicy::default()
                .tier(Money::from_units(1_000), Rate::new(dec!(0.05)))
                .tier(Money::from_units(5_000), Rate::new(dec!(0.10))),
            referral_enabled: false,
            min_charge_for_referral: Money::from_units(100),
            reward_value: Money::from_units(10),
            reward_remarks: "reward because of invitation".to_string(),
            charge_value_limit_by_role,
            default_charge_value_limit: Money::from_units(100_000),
            estimator_enabled: true,
            estimator_cap_days: 7,
            debit_counts_as_first_charge: false,
            notify_account_charged: true,
            external_balance_enabled: false,
        }
    }
}

impl LedgerConfig {
    /// Bound on `|value|` for a caller holding `roles`
    ///
    /// The tightest limit among the caller's limited roles wins.
    pub fn charge_value_limit(&self, roles: &[String]) -> Money {
        roles
            .iter()
            .filter_map(|role| self.charge_value_limit_by_role.get(role))
            .min()
            .copied()
            .unwrap_or(self.default_charge_value_limit)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.estimator_cap_days < 1 {
            return Err(CoreError::configuration(format!(
                "estimator_cap_days must be at least 1, got {}",
                self.estimator_cap_days
            )));
        }
        if self.reward_value.is_negative() {
            return Err(CoreError::configuration("reward_value must not be negative"));
        }
        if self.default_charge_value_limit.is_negative() {
            return Err(CoreError::configuration("default_charge_value_limit must not be negative"));
        }
        if let Some((role, _)) = self.charge_value_limit_by_role.iter().find(|(_, limit)| limit.is_negative()) {
            return Err(CoreError::configuration(format!("charge limit for role {role} is negative")));
        }
        if self.bonus_policy.tiers.iter().any(|tier| tier.rate.as_decimal().is_sign_negative()) {
            return Err(CoreError::configuration("bonus rates must not be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tightest_role_limit_wins() {
        let config = LedgerConfig::default();
        let roles = vec!["accountant".to_string(), "support".to_string()];
        assert_eq!(config.charge_value_limit(&roles), Money::from_units(200));
        assert_eq!(config.charge_value_limit(&[]), Money::from_units(100_000));
        assert_eq!(config.charge_value_limit(&["admin".to_string()]), Money::from_units(100_000));
    }

    #[test]
    fn test_bonus_tier_selection() {
        let policy = LedgerConfig::default().bonus_policy;
        assert_eq!(policy.rate_for(Money::from_units(999)), None);
        assert_eq!(policy.rate_for(Money::from_units(1_000)), Some(Rate::new(dec!(0.05))));
        assert_eq!(policy.rate_for(Money::from_units(7_000)), Some(Rate::new(dec!(0.10))));
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let config = LedgerConfig {
            estimator_cap_days: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(LedgerConfig::default().validate().is_ok());
    }
}
