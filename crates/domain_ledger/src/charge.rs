//! Charge records and history queries
//!
//! A charge is an immutable record of one balance mutation. Positive values
//! are credits, negative values are debits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use core_kernel::{ChargeId, CoreError, Money, TimeRange, UserId};

/// Kind of balance mutation
///
/// Equality and hashing go through [`ChargeType::as_str`], so
/// `Other("bonus")` and `Bonus` are the same type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChargeType {
    /// Top-up paid by the tenant
    Money,
    /// Promotional credit (top-up bonus or referral reward)
    Bonus,
    /// Movement between two accounts
    Transfer,
    /// Metering debit for resource usage
    Consumption,
    /// Credit from a redeemed prepaid code
    Coupon,
    /// Any other credit kind recorded by upstream systems
    Other(String),
}

/// Charge types that never make a later charge the account's first
pub const NON_QUALIFYING_TYPES: [&str; 4] = ["bonus", "transfer", "consumption", "coupon"];

impl ChargeType {
    pub fn as_str(&self) -> &str {
        match self {
            ChargeType::Money => "money",
            ChargeType::Bonus => "bonus",
            ChargeType::Transfer => "transfer",
            ChargeType::Consumption => "consumption",
            ChargeType::Coupon => "coupon",
            ChargeType::Other(kind) => kind,
        }
    }

    pub fn is_bonus(&self) -> bool {
        self.as_str() == ChargeType::Bonus.as_str()
    }

    /// Returns true if a charge of this type and value counts as a top-up
    /// for first-charge detection
    pub fn counts_as_top_up(&self, value: Money, include_debits: bool) -> bool {
        if NON_QUALIFYING_TYPES.contains(&self.as_str()) {
            return false;
        }
        value.is_positive() || (include_debits && !value.is_zero())
    }
}

impl From<String> for ChargeType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "money" => ChargeType::Money,
            "bonus" => ChargeType::Bonus,
            "transfer" => ChargeType::Transfer,
            "consumption" => ChargeType::Consumption,
            "coupon" => ChargeType::Coupon,
            _ => ChargeType::Other(value),
        }
    }
}

impl PartialEq for ChargeType {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ChargeType {}

impl Hash for ChargeType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl From<&str> for ChargeType {
    fn from(value: &str) -> Self {
        ChargeType::from(value.to_string())
    }
}

impl From<ChargeType> for String {
    fn from(value: ChargeType) -> String {
        value.as_str().to_string()
    }
}

impl fmt::Display for ChargeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub charge_id: ChargeId,
    pub user_id: UserId,
    /// Actor who requested the mutation
    pub operator: UserId,
    pub value: Money,
    pub charge_type: ChargeType,
    /// Channel or subsystem the charge came from
    pub come_from: String,
    /// Payment provider reference, if any
    pub trading_number: Option<String>,
    pub charge_time: DateTime<Utc>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A charge about to be recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCharge {
    pub charge_id: Option<ChargeId>,
    pub user_id: UserId,
    pub operator: UserId,
    pub value: Money,
    pub charge_type: ChargeType,
    pub come_from: String,
    pub trading_number: Option<String>,
    /// Defaults to the recording time
    pub charge_time: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
}

impl NewCharge {
    pub fn new(user_id: impl Into<UserId>, value: Money, charge_type: ChargeType) -> Self {
        let user_id = user_id.into();
        Self {
            charge_id: None,
            operator: user_id.clone(),
            user_id,
            value,
            charge_type,
            come_from: "system".to_string(),
            trading_number: None,
            charge_time: None,
            remarks: None,
        }
    }

    pub fn operator(mut self, operator: impl Into<UserId>) -> Self {
        self.operator = operator.into();
        self
    }

    pub fn come_from(mut self, come_from: impl Into<String>) -> Self {
        self.come_from = come_from.into();
        self
    }

    pub fn trading_number(mut self, trading_number: impl Into<String>) -> Self {
        self.trading_number = Some(trading_number.into());
        self
    }

    pub fn at(mut self, charge_time: DateTime<Utc>) -> Self {
        self.charge_time = Some(charge_time);
        self
    }

    pub fn remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    /// Materializes the record, assigning id and timestamps
    pub fn into_charge(self, now: DateTime<Utc>) -> Charge {
        Charge {
            charge_id: self.charge_id.unwrap_or_else(ChargeId::new_v7),
            user_id: self.user_id,
            operator: self.operator,
            value: self.value,
            charge_type: self.charge_type,
            come_from: self.come_from,
            trading_number: self.trading_number,
            charge_time: self.charge_time.unwrap_or(now),
            remarks: self.remarks,
            created_at: now,
        }
    }
}

/// Filter over charge history; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChargeFilter {
    pub user_id: Option<UserId>,
    pub charge_type: Option<ChargeType>,
    pub time_range: Option<TimeRange>,
}

impl ChargeFilter {
    pub fn for_user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn of_type(mut self, charge_type: ChargeType) -> Self {
        self.charge_type = Some(charge_type);
        self
    }

    pub fn within(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn matches(&self, charge: &Charge) -> bool {
        self.user_id.as_ref().map_or(true, |id| *id == charge.user_id)
            && self.charge_type.as_ref().map_or(true, |t| *t == charge.charge_type)
            && self.time_range.map_or(true, |range| range.contains(charge.charge_time))
    }
}

/// Ordering of paginated results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    /// Newest first
    #[default]
    Descending,
}

/// Limit/offset pagination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    /// `None` returns every remaining row
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: SortDirection,
}

impl Pagination {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
            sort: SortDirection::Descending,
        }
    }

    /// Every row, newest first
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ascending(mut self) -> Self {
        self.sort = SortDirection::Ascending;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(limit) = self.limit {
            if limit < 0 {
                return Err(CoreError::validation(format!("limit must be non-negative, got {limit}")));
            }
        }
        if let Some(offset) = self.offset {
            if offset < 0 {
                return Err(CoreError::validation(format!("offset must be non-negative, got {offset}")));
            }
        }
        Ok(())
    }

    /// Applies the window to an already sorted sequence
    pub fn slice<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0).max(0) as usize;
        let iter = items.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.take(limit.max(0) as usize).collect(),
            None => iter.collect(),
        }
    }
}

/// Aggregate over every row matching a filter, ignoring pagination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeTotals {
    pub total_value: Money,
    pub count: u64,
}

impl ChargeTotals {
    pub fn of<'a>(charges: impl IntoIterator<Item = &'a Charge>) -> Self {
        charges.into_iter().fold(Self::default(), |acc, charge| Self {
            total_value: acc.total_value + charge.value,
            count: acc.count + 1,
        })
    }
}

/// One page of charge history plus the totals of the whole filtered set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargePage {
    pub charges: Vec<Charge>,
    pub total_count: u64,
    pub total_value: Money,
}
