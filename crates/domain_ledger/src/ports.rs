//! Ledger Domain Ports
//!
//! Port interfaces for the ledger, enabling swappable storage backends
//! (PostgreSQL in `infra_db`, in-memory in [`crate::adapters`]) and
//! swappable neighbours (order source, external balance, notifier).
//!
//! # Transactions
//!
//! Every balance mutation runs inside a [`LedgerTransaction`] obtained from
//! [`LedgerTransactionManager::begin`]. Locks taken by
//! [`LedgerTransaction::get_for_update`] are held until the transaction is
//! committed or rolled back, which gives per-account serializability.
//! Callers that lock more than one account must lock them in ascending
//! `UserId` order, and lock a prepaid code before the account it credits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{ChargeId, DomainPort, HealthCheckable, Money, OperationMetadata, PortError, UserId};

use crate::account::{Account, AccountFilter};
use crate::charge::{Charge, ChargeFilter, ChargeTotals, ChargeType, NewCharge, Pagination};
use crate::invitee::Invitee;
use crate::order::Order;
use crate::precharge::{PreCharge, PreChargeFilter};

/// Non-locking account reads
#[async_trait]
pub trait AccountStore: DomainPort {
    /// Reads an account without locking; soft-deleted accounts are not found
    async fn get_read_only(&self, user_id: &UserId) -> Result<Account, PortError>;

    /// Lists accounts matching `filter` with the total count of matches
    async fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: &Pagination,
    ) -> Result<(Vec<Account>, u64), PortError>;

    /// Lists the referral relations created by `inviter` with their total count
    async fn list_invitees(
        &self,
        inviter: &UserId,
        page: &Pagination,
    ) -> Result<(Vec<Invitee>, u64), PortError>;
}

/// Charge history reads
#[async_trait]
pub trait ChargeLedger: DomainPort {
    /// Charges matching `filter`, ordered by charge time per `page.sort`
    async fn query(&self, filter: &ChargeFilter, page: &Pagination) -> Result<Vec<Charge>, PortError>;

    /// Sum and count over every charge matching `filter`
    async fn aggregate_total(&self, filter: &ChargeFilter) -> Result<ChargeTotals, PortError>;
}

/// Non-locking prepaid code reads
#[async_trait]
pub trait PreChargeStore: DomainPort {
    /// Reads a code; soft-deleted codes are not found
    async fn get_precharge(&self, code: &str) -> Result<PreCharge, PortError>;

    /// Lists codes matching `filter`, newest first, with the total count of matches
    async fn list_precharges(
        &self,
        filter: &PreChargeFilter,
        page: &Pagination,
    ) -> Result<(Vec<PreCharge>, u64), PortError>;
}

/// Opens ledger transactions
#[async_trait]
pub trait LedgerTransactionManager: DomainPort {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, PortError>;
}

/// A unit of work over accounts, charges, and referral relations
///
/// Writes become visible to other transactions only on [`commit`]. Dropping
/// a transaction without committing discards its writes.
///
/// [`commit`]: LedgerTransaction::commit
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Locks and reads an account; re-locking an already held account is a no-op
    async fn get_for_update(&mut self, user_id: &UserId) -> Result<Account, PortError>;

    /// Inserts a new account; fails with `Conflict` if the id is taken
    async fn insert_account(&mut self, account: &Account) -> Result<(), PortError>;

    /// Persists a mutated account that this transaction holds locked
    async fn save_account(&mut self, account: &Account) -> Result<(), PortError>;

    /// Returns true if the account already has a charge that counts as a top-up
    async fn has_top_up(&mut self, user_id: &UserId, include_debits: bool) -> Result<bool, PortError>;

    /// Appends a charge, assigning id and timestamps if unset
    async fn append_charge(&mut self, charge: NewCharge) -> Result<Charge, PortError>;

    /// Locks and reads the referral relation of `invitee`
    async fn get_invitee_for_update(&mut self, invitee: &UserId) -> Result<Option<Invitee>, PortError>;

    /// Inserts or updates a referral relation
    async fn save_invitee(&mut self, relation: &Invitee) -> Result<(), PortError>;

    /// Inserts a new prepaid code; fails with `Conflict` if the code is taken
    async fn insert_precharge(&mut self, precharge: &PreCharge) -> Result<(), PortError>;

    /// Locks and reads a non-deleted prepaid code
    async fn get_precharge_for_update(&mut self, code: &str) -> Result<Option<PreCharge>, PortError>;

    /// Persists a mutated prepaid code that this transaction holds locked
    async fn save_precharge(&mut self, precharge: &PreCharge) -> Result<(), PortError>;

    async fn commit(self: Box<Self>) -> Result<(), PortError>;

    async fn rollback(self: Box<Self>) -> Result<(), PortError>;
}

/// Everything the ledger needs from its storage backend
pub trait LedgerBackend:
    AccountStore + ChargeLedger + PreChargeStore + LedgerTransactionManager + HealthCheckable
{
}

impl<T> LedgerBackend for T where
    T: AccountStore + ChargeLedger + PreChargeStore + LedgerTransactionManager + HealthCheckable
{
}

/// Read and reconciliation access to the metering system's orders
#[async_trait]
pub trait OrderSource: DomainPort {
    /// Active orders billed by the hour
    async fn active_hourly_orders(&self, user_id: &UserId) -> Result<Vec<Order>, PortError>;

    /// Clears `owed` on the account's non-deleted orders, returning how many changed
    async fn settle_owed_orders(&self, user_id: &UserId) -> Result<u64, PortError>;
}

/// Display balance sourced from another billing system
#[async_trait]
pub trait ExternalBalanceProvider: DomainPort {
    async fn balance(&self, user_id: &UserId, metadata: &OperationMetadata) -> Result<Money, PortError>;
}

/// Payload sent after a committed charge
///
/// One is sent for the charged account and, when a referral reward was
/// paid, one for the inviter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeNotification {
    pub charge_id: ChargeId,
    pub user_id: UserId,
    pub operator: UserId,
    pub value: Money,
    pub charge_type: ChargeType,
    /// Bonus credited alongside the charge, zero if none
    pub bonus: Money,
    /// Balance after commit
    pub balance: Money,
    pub is_first_charge: bool,
    pub remarks: Option<String>,
    pub charge_time: DateTime<Utc>,
}

impl ChargeNotification {
    pub fn for_charge(charge: &Charge, bonus: Money, balance: Money, is_first_charge: bool) -> Self {
        Self {
            charge_id: charge.charge_id,
            user_id: charge.user_id.clone(),
            operator: charge.operator.clone(),
            value: charge.value,
            charge_type: charge.charge_type.clone(),
            bonus,
            balance,
            is_first_charge,
            remarks: charge.remarks.clone(),
            charge_time: charge.charge_time,
        }
    }
}

/// Fire-and-forget delivery of charge notifications
#[async_trait]
pub trait Notifier: DomainPort {
    async fn account_charged(&self, notification: ChargeNotification) -> Result<(), PortError>;
}
