//! Referral reward decisions

use core_kernel::{Money, UserId};

use crate::account::Account;
use crate::charge::Charge;
use crate::config::LedgerConfig;
use crate::invitee::Invitee;

/// A reward owed to an inviter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reward {
    pub inviter: UserId,
    pub invitee: UserId,
    pub value: Money,
    pub remarks: String,
}

/// Decides whether an applied charge earns the account's inviter a reward
#[derive(Debug, Clone)]
pub struct ReferralRewardEngine {
    enabled: bool,
    min_charge: Money,
    reward_value: Money,
    remarks: String,
}

impl ReferralRewardEngine {
    pub fn new(enabled: bool, min_charge: Money, reward_value: Money, remarks: impl Into<String>) -> Self {
        Self {
            enabled,
            min_charge,
            reward_value,
            remarks: remarks.into(),
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(
            config.referral_enabled,
            config.min_charge_for_referral,
            config.reward_value,
            config.reward_remarks.clone(),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the reward earned by `charge`, if any
    ///
    /// `relation` is the locked referral record for the account; a relation
    /// already marked charged never yields a second reward. A missing
    /// relation is treated as unrewarded.
    pub fn maybe_reward(
        &self,
        account: &Account,
        charge: &Charge,
        is_first_charge: bool,
        relation: Option<&Invitee>,
    ) -> Option<Reward> {
        if !self.enabled || !is_first_charge || charge.charge_type.is_bonus() {
            return None;
        }
        let inviter = account.inviter.as_ref().filter(|id| !id.is_empty())?;
        if *inviter == account.user_id {
            return None;
        }
        if charge.value < self.min_charge || !self.reward_value.is_positive() {
            return None;
        }
        if relation.map_or(false, |r| r.charged) {
            return None;
        }
        Some(Reward {
            inviter: inviter.clone(),
            invitee: account.user_id.clone(),
            value: self.reward_value,
            remarks: self.remarks.clone(),
        })
    }
}
