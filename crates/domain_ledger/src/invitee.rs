//! Referral relations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{Money, UserId};

/// Records that `inviter` brought `invitee` to the platform
///
/// `charged` flips to true exactly once, when the reward for the invitee's
/// first top-up is paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitee {
    pub inviter: UserId,
    pub invitee: UserId,
    pub charged: bool,
    pub reward_value: Money,
    pub created_at: DateTime<Utc>,
    pub rewarded_at: Option<DateTime<Utc>>,
}

impl Invitee {
    pub fn new(inviter: UserId, invitee: UserId, now: DateTime<Utc>) -> Self {
        Self {
            inviter,
            invitee,
            charged: false,
            reward_value: Money::ZERO,
            created_at: now,
            rewarded_at: None,
        }
    }

    /// Records the paid reward. Returns false if one was already paid.
    pub fn mark_rewarded(&mut self, value: Money, now: DateTime<Utc>) -> bool {
        if self.charged {
            return false;
        }
        self.charged = true;
        self.reward_value = value;
        self.rewarded_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_recorded_once() {
        let mut relation = Invitee::new("alice".into(), "bob".into(), Utc::now());
        assert!(relation.mark_rewarded(Money::from_units(10), Utc::now()));
        assert!(!relation.mark_rewarded(Money::from_units(99), Utc::now()));
        assert_eq!(relation.reward_value, Money::from_units(10));
    }
}
