//! Prepaid codes
//!
//! An operator issues batches of codes worth a fixed price. A code can be
//! handed out once and redeemed once before it expires; redeeming credits
//! the redeeming account with a `coupon` charge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use core_kernel::{Money, UserId};

use crate::error::LedgerError;

/// Length of generated codes
pub const CODE_LENGTH: usize = 16;
/// Largest batch a single request may issue
pub const MAX_BATCH_SIZE: u32 = 1000;

/// A prepaid code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCharge {
    pub code: String,
    pub price: Money,
    /// Operator who issued the code
    pub operator: UserId,
    /// Account that redeemed the code
    pub user_id: Option<UserId>,
    pub used: bool,
    pub dispatched: bool,
    pub deleted: bool,
    pub remarks: Option<String>,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PreCharge {
    pub fn issue(code: String, request: &NewPreCharges, operator: UserId, now: DateTime<Utc>) -> Self {
        Self {
            code,
            price: request.price,
            operator,
            user_id: None,
            used: false,
            dispatched: false,
            deleted: false,
            remarks: request.remarks.clone(),
            expired_at: request.expired_at,
            created_at: now,
            used_at: None,
            deleted_at: None,
        }
    }

    /// A random upper-case hexadecimal code
    pub fn generate_code() -> String {
        let mut code = Uuid::new_v4().simple().to_string();
        code.truncate(CODE_LENGTH);
        code.make_ascii_uppercase();
        code
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired_at < now
    }

    /// Marks the code handed out; `remarks` replaces the issue remarks when given
    pub fn dispatch(&mut self, remarks: Option<String>) -> Result<(), LedgerError> {
        if self.used {
            return Err(LedgerError::PreChargeUsed(self.code.clone()));
        }
        if self.dispatched {
            return Err(LedgerError::PreChargeDispatched(self.code.clone()));
        }
        self.dispatched = true;
        if remarks.is_some() {
            self.remarks = remarks;
        }
        Ok(())
    }

    /// Marks the code redeemed by `user_id`
    pub fn redeem(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.used {
            return Err(LedgerError::PreChargeUsed(self.code.clone()));
        }
        if self.is_expired(now) {
            return Err(LedgerError::PreChargeExpired(self.code.clone()));
        }
        self.used = true;
        self.user_id = Some(user_id);
        self.used_at = Some(now);
        Ok(())
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.deleted = true;
        self.deleted_at = Some(now);
    }
}

/// Request to issue a batch of codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPreCharges {
    pub number: u32,
    pub price: Money,
    pub expired_at: DateTime<Utc>,
    pub remarks: Option<String>,
}

impl NewPreCharges {
    pub fn new(number: u32, price: Money, expired_at: DateTime<Utc>) -> Self {
        Self {
            number,
            price,
            expired_at,
            remarks: None,
        }
    }

    pub fn remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.number) {
            return Err(LedgerError::InvalidArgument(format!(
                "number of codes must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.number
            )));
        }
        if !self.price.is_positive() {
            return Err(LedgerError::InvalidArgument(format!(
                "code price must be positive, got {}",
                self.price
            )));
        }
        if self.expired_at <= now {
            return Err(LedgerError::InvalidArgument("codes must expire in the future".into()));
        }
        Ok(())
    }
}

/// Filter for code listings; deleted codes are never listed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreChargeFilter {
    /// Only codes redeemed by this account
    pub user_id: Option<UserId>,
}

impl PreChargeFilter {
    pub fn redeemed_by(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn matches(&self, precharge: &PreCharge) -> bool {
        !precharge.deleted
            && self
                .user_id
                .as_ref()
                .map_or(true, |id| precharge.user_id.as_ref() == Some(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreChargePage {
    pub precharges: Vec<PreCharge>,
    pub total_count: u64,
}
