//! Pre-built Test Fixtures
//!
//! Ready-to-use test data for the ledger. These fixtures are consistent and
//! predictable so assertions can use literal values.

use chrono::{DateTime, TimeZone, Utc};
use core_kernel::{Money, Rate, TimeRange, UserId};
use domain_ledger::{BonusPolicy, LedgerConfig, RequestContext};
use rust_decimal_macros::dec;

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// A small top-up below the referral threshold
    pub fn ten() -> Money {
        Money::from_units(10)
    }

    /// The default referral threshold
    pub fn hundred() -> Money {
        Money::from_units(100)
    }

    /// A top-up large enough for the first bonus tier
    pub fn thousand() -> Money {
        Money::from_units(1000)
    }

    /// An hourly price that burns exactly one unit per day
    pub fn one_per_day_hourly() -> Money {
        Money::new(dec!(1) / dec!(24))
    }

    /// A typical debit, e.g. a consumption charge
    pub fn debit() -> Money {
        Money::new(dec!(-12.5))
    }
}

/// Fixture for temporal test data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// Jan 1, 2024 00:00 UTC
    pub fn jan_1() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Jan 15, 2024 12:00 UTC
    pub fn mid_january() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    /// Feb 1, 2024 00:00 UTC
    pub fn feb_1() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    /// January 2024 as a half-open range
    pub fn january() -> TimeRange {
        TimeRange::new(Self::jan_1(), Self::feb_1()).unwrap()
    }
}

/// Fixture for users and request contexts
pub struct UserFixtures;

impl UserFixtures {
    pub fn tenant() -> UserId {
        UserId::from("tenant-1")
    }

    /// An accountant with the default 100000 limit
    pub fn accountant() -> RequestContext {
        RequestContext::new("accountant-1").with_role("accountant")
    }

    /// A support operator limited to 200 per charge
    pub fn support() -> RequestContext {
        RequestContext::new("support-1").with_role("support")
    }
}

/// Fixture for ledger policy
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Referral rewards of 10 for first top-ups of at least 100
    pub fn referral() -> LedgerConfig {
        LedgerConfig {
            referral_enabled: true,
            min_charge_for_referral: MoneyFixtures::hundred(),
            reward_value: MoneyFixtures::ten(),
            ..Default::default()
        }
    }

    /// A 5% bonus from 1000 and a 10% bonus from 5000
    pub fn bonus() -> LedgerConfig {
        LedgerConfig {
            bonus_enabled: true,
            bonus_policy: BonusPolicy::default()
                .tier(Money::from_units(1000), Rate::from_percentage(dec!(5)))
                .tier(Money::from_units(5000), Rate::from_percentage(dec!(10))),
            ..Default::default()
        }
    }

    /// Bonus and referral both enabled
    pub fn full() -> LedgerConfig {
        LedgerConfig {
            referral_enabled: true,
            min_charge_for_referral: MoneyFixtures::hundred(),
            reward_value: MoneyFixtures::ten(),
            ..Self::bonus()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_per_day_rounds_to_scale() {
        assert_eq!(MoneyFixtures::one_per_day_hourly().amount(), dec!(0.0417));
    }

    #[test]
    fn test_january_contains_mid_month() {
        assert!(TemporalFixtures::january().contains(TemporalFixtures::mid_january()));
        assert!(!TemporalFixtures::january().contains(TemporalFixtures::feb_1()));
    }

    #[test]
    fn test_full_config_is_valid() {
        let config = ConfigFixtures::full();
        assert!(config.validate().is_ok());
        assert!(config.bonus_enabled && config.referral_enabled);
    }
}
