//! Tenant accounts
//!
//! An account holds the tenant's prepaid balance. Its `owed` flag is derived
//! state: it is recomputed from the balance on every mutation and never set
//! independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{Money, MoneyError, UserId};

use crate::charge::ChargeType;
use crate::error::LedgerError;

/// Lowest account level
pub const MIN_LEVEL: i32 = 0;
/// Highest account level
pub const MAX_LEVEL: i32 = 9;
/// Level assigned to new accounts unless the caller chooses one
pub const DEFAULT_LEVEL: i32 = 3;
/// Accounts at this level may freeze more than their balance
pub const OVERDRAFT_LEVEL: i32 = MAX_LEVEL;

/// A tenant's account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub balance: Money,
    /// Funds reserved out of `balance`, returned by unfreezing
    pub frozen_balance: Money,
    /// Lifetime consumption, grows with metering debits
    pub consumption: Money,
    pub level: i32,
    pub owed: bool,
    pub inviter: Option<UserId>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Opens an empty account
    pub fn open(user_id: UserId, level: i32, inviter: Option<UserId>, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        validate_level(level)?;
        Ok(Self {
            user_id,
            balance: Money::ZERO,
            frozen_balance: Money::ZERO,
            consumption: Money::ZERO,
            level,
            owed: false,
            inviter: inviter.filter(|id| !id.is_empty()),
            deleted: false,
            created_at: now,
            updated_at: None,
            deleted_at: None,
        })
    }

    /// Adds a signed value to the balance and refreshes derived state
    pub fn apply(&mut self, value: Money, charge_type: &ChargeType, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.balance = self.balance.checked_add(&value)?;
        if *charge_type == ChargeType::Consumption && value.is_negative() {
            self.consumption = self.consumption.checked_add(&value.abs())?;
        }
        self.owed = self.balance.is_negative();
        self.updated_at = Some(now);
        Ok(())
    }

    /// Changes the account level
    pub fn set_level(&mut self, level: i32, now: DateTime<Utc>) -> Result<(), LedgerError> {
        validate_level(level)?;
        self.level = level;
        self.updated_at = Some(now);
        Ok(())
    }

    /// Marks the account deleted; its history is kept
    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = Some(now);
    }

    /// Moves `amount` from the balance into the frozen balance
    ///
    /// Fails with `InsufficientFunds` when the balance does not cover
    /// `amount`, unless the account is at [`OVERDRAFT_LEVEL`].
    pub fn freeze(&mut self, amount: Money, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.balance < amount && self.level != OVERDRAFT_LEVEL {
            return Err(LedgerError::InsufficientFunds {
                user_id: self.user_id.clone(),
                balance: self.balance,
                value: amount,
            });
        }
        self.balance = self.balance.checked_sub(&amount)?;
        self.frozen_balance = self.frozen_balance.checked_add(&amount)?;
        self.owed = self.balance.is_negative();
        self.updated_at = Some(now);
        Ok(())
    }

    /// Returns `amount` from the frozen balance to the balance
    pub fn unfreeze(&mut self, amount: Money, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.frozen_balance < amount {
            return Err(LedgerError::InsufficientFrozenBalance {
                user_id: self.user_id.clone(),
                frozen_balance: self.frozen_balance,
                value: amount,
            });
        }
        self.frozen_balance = self.frozen_balance.checked_sub(&amount)?;
        self.balance = self.balance.checked_add(&amount)?;
        self.owed = self.balance.is_negative();
        self.updated_at = Some(now);
        Ok(())
    }

    /// Spendable plus frozen funds; equals the sum of the charge history
    pub fn total_balance(&self) -> Result<Money, MoneyError> {
        self.balance.checked_add(&self.frozen_balance)
    }

    /// Returns true if the stored owed flag agrees with the balance
    pub fn is_consistent(&self) -> bool {
        self.owed == self.balance.is_negative()
    }
}

fn validate_level(level: i32) -> Result<(), LedgerError> {
    if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
        return Err(LedgerError::InvalidLevel(level));
    }
    Ok(())
}

/// Request to open an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub user_id: UserId,
    pub level: Option<i32>,
    pub inviter: Option<UserId>,
}

impl NewAccount {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            level: None,
            inviter: None,
        }
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn invited_by(mut self, inviter: impl Into<UserId>) -> Self {
        self.inviter = Some(inviter.into());
        self
    }
}

/// Filter for account listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    /// Only owed (`Some(true)`) or only not owed (`Some(false)`) accounts
    pub owed: Option<bool>,
    pub include_deleted: bool,
}

impl AccountFilter {
    pub fn owed() -> Self {
        Self {
            owed: Some(true),
            ..Default::default()
        }
    }

    pub fn matches(&self, account: &Account) -> bool {
        if account.deleted && !self.include_deleted {
            return false;
        }
        self.owed.map_or(true, |owed| account.owed == owed)
    }
}
