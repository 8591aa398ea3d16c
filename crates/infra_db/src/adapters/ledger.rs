//! PostgreSQL Ledger Adapter
//!
//! Implements the ledger storage ports on PostgreSQL. Account and prepaid
//! code locks are row locks taken with `SELECT ... FOR UPDATE`; each transaction sets a local
//! `lock_timeout` so a contended row surfaces as `PortError::Timeout`
//! instead of blocking indefinitely.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, DatabaseConfig, PgLedgerStore};
//!
//! let config = DatabaseConfig::new("postgres://localhost/ledger");
//! let pool = create_pool(&config).await?;
//! let store = PgLedgerStore::new(pool).with_lock_timeout(config.lock_timeout);
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use core_kernel::{DomainPort, HealthCheckResult, HealthCheckable, PortError, UserId};
use domain_ledger::{
    Account, AccountFilter, AccountStore, Charge, ChargeFilter, ChargeLedger, ChargeTotals, Invitee,
    LedgerTransaction, LedgerTransactionManager, NewCharge, Pagination, PreCharge, PreChargeFilter, PreChargeStore,
};

use crate::error::{port_error, DatabaseError};
use crate::repositories::ledger::{locked, LedgerRepository};

const ADAPTER_ID: &str = "ledger-postgres";

/// PostgreSQL-backed account store, charge ledger, prepaid code store, and
/// transaction manager
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    repository: LedgerRepository,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: LedgerRepository::new(pool),
            lock_timeout: Duration::from_secs(5),
        }
    }

    /// Bounds how long a transaction waits for a contended account row
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn repository(&self) -> &LedgerRepository {
        &self.repository
    }
}

impl DomainPort for PgLedgerStore {}

#[async_trait]
impl HealthCheckable for PgLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(self.repository.pool())
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheckResult::healthy(ADAPTER_ID, latency_ms),
            Err(e) => HealthCheckResult::unhealthy(ADAPTER_ID, latency_ms, format!("Database error: {}", e)),
        }
    }
}

#[async_trait]
impl AccountStore for PgLedgerStore {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get_read_only(&self, user_id: &UserId) -> Result<Account, PortError> {
        self.repository
            .find_account(user_id)
            .await?
            .map(Account::from)
            .ok_or_else(|| PortError::not_found("Account", user_id))
    }

    async fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: &Pagination,
    ) -> Result<(Vec<Account>, u64), PortError> {
        let (rows, total) = self.repository.list_accounts(filter, page).await?;
        Ok((rows.into_iter().map(Account::from).collect(), total))
    }

    async fn list_invitees(
        &self,
        inviter: &UserId,
        page: &Pagination,
    ) -> Result<(Vec<Invitee>, u64), PortError> {
        let (rows, total) = self.repository.list_invitees(inviter, page).await?;
        Ok((rows.into_iter().map(Invitee::from).collect(), total))
    }
}

#[async_trait]
impl ChargeLedger for PgLedgerStore {
    #[instrument(skip(self))]
    async fn query(&self, filter: &ChargeFilter, page: &Pagination) -> Result<Vec<Charge>, PortError> {
        let rows = self.repository.query_charges(filter, page).await?;
        debug!(count = rows.len(), "Loaded charges");
        Ok(rows.into_iter().map(Charge::from).collect())
    }

    async fn aggregate_total(&self, filter: &ChargeFilter) -> Result<ChargeTotals, PortError> {
        Ok(self.repository.charge_totals(filter).await?)
    }
}

#[async_trait]
impl PreChargeStore for PgLedgerStore {
    async fn get_precharge(&self, code: &str) -> Result<PreCharge, PortError> {
        self.repository
            .find_precharge(code)
            .await?
            .map(PreCharge::from)
            .ok_or_else(|| PortError::not_found("PreCharge", code))
    }

    async fn list_precharges(
        &self,
        filter: &PreChargeFilter,
        page: &Pagination,
    ) -> Result<(Vec<PreCharge>, u64), PortError> {
        let (rows, total) = self.repository.list_precharges(filter, page).await?;
        Ok((rows.into_iter().map(PreCharge::from).collect(), total))
    }
}

#[async_trait]
impl LedgerTransactionManager for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, PortError> {
        let mut tx = self.repository.pool().begin().await.map_err(port_error)?;
        locked::set_lock_timeout(&mut tx, self.lock_timeout.as_millis()).await?;
        Ok(Box::new(PgLedgerTransaction { tx }))
    }
}

/// A ledger transaction on a pooled PostgreSQL connection
///
/// Dropping it without `commit` rolls back on the server.
pub struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn get_for_update(&mut self, user_id: &UserId) -> Result<Account, PortError> {
        locked::select_account_for_update(&mut self.tx, user_id)
            .await?
            .map(Account::from)
            .ok_or_else(|| PortError::not_found("Account", user_id))
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), PortError> {
        locked::insert_account(&mut self.tx, account).await.map_err(|e| match e {
            DatabaseError::DuplicateEntry(_) => {
                PortError::conflict(format!("account {} already exists", account.user_id))
            }
            other => other.into(),
        })
    }

    async fn save_account(&mut self, account: &Account) -> Result<(), PortError> {
        locked::update_account(&mut self.tx, account)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => PortError::not_found("Account", &account.user_id),
                other => other.into(),
            })
    }

    async fn has_top_up(&mut self, user_id: &UserId, include_debits: bool) -> Result<bool, PortError> {
        Ok(locked::has_top_up(&mut self.tx, user_id, include_debits).await?)
    }

    async fn append_charge(&mut self, charge: NewCharge) -> Result<Charge, PortError> {
        let charge = charge.into_charge(Utc::now());
        locked::insert_charge(&mut self.tx, &charge).await?;
        debug!(charge_id = %charge.charge_id, user_id = %charge.user_id, value = %charge.value, "Appended charge");
        Ok(charge)
    }

    async fn get_invitee_for_update(&mut self, invitee: &UserId) -> Result<Option<Invitee>, PortError> {
        Ok(locked::select_invitee_for_update(&mut self.tx, invitee)
            .await?
            .map(Invitee::from))
    }

    async fn save_invitee(&mut self, relation: &Invitee) -> Result<(), PortError> {
        Ok(locked::upsert_invitee(&mut self.tx, relation).await?)
    }

    async fn insert_precharge(&mut self, precharge: &PreCharge) -> Result<(), PortError> {
        locked::insert_precharge(&mut self.tx, precharge)
            .await
            .map_err(|e| match e {
                DatabaseError::DuplicateEntry(_) => {
                    PortError::conflict(format!("prepaid code {} already exists", precharge.code))
                }
                other => other.into(),
            })
    }

    #[instrument(skip(self))]
    async fn get_precharge_for_update(&mut self, code: &str) -> Result<Option<PreCharge>, PortError> {
        Ok(locked::select_precharge_for_update(&mut self.tx, code)
            .await?
            .map(PreCharge::from))
    }

    async fn save_precharge(&mut self, precharge: &PreCharge) -> Result<(), PortError> {
        locked::update_precharge(&mut self.tx, precharge)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => PortError::not_found("PreCharge", &precharge.code),
                other => other.into(),
            })
    }

    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        self.tx.commit().await.map_err(port_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), PortError> {
        self.tx.rollback().await.map_err(port_error)
    }
}
