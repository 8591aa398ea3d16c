//! In-memory ledger adapters
//!
//! A process-local backend implementing the same transactional contract as
//! the PostgreSQL adapter. Each account and prepaid code has its own async
//! mutex; a transaction keeps the owned guards of every row it locked until it
//! commits or is dropped. Writes are staged on the transaction and published
//! under a single state lock at commit, so readers never observe a partial
//! mutation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use core_kernel::{DomainPort, HealthCheckResult, HealthCheckable, OrderId, PortError, UserId};

use crate::account::{Account, AccountFilter};
use crate::charge::{Charge, ChargeFilter, ChargeTotals, NewCharge, Pagination, SortDirection};
use crate::invitee::Invitee;
use crate::order::Order;
use crate::ports::{
    AccountStore, ChargeLedger, LedgerTransaction, LedgerTransactionManager, OrderSource, PreChargeStore,
};
use crate::precharge::{PreCharge, PreChargeFilter};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<UserId, Account>,
    /// Charges with their insertion sequence, used to break charge_time ties
    charges: Vec<(u64, Charge)>,
    invitees: HashMap<UserId, Invitee>,
    precharges: HashMap<String, PreCharge>,
    next_seq: u64,
}

/// Row identity a transaction can lock
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Account(UserId),
    Code(String),
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKey::Account(user_id) => write!(f, "account {user_id}"),
            LockKey::Code(code) => write!(f, "prepaid code {code}"),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl Shared {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, PortError> {
        self.tables
            .lock()
            .map_err(|_| PortError::internal("ledger state lock poisoned"))
    }

    fn row_lock(&self, key: &LockKey) -> Result<Arc<AsyncMutex<()>>, PortError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| PortError::internal("row lock table poisoned"))?;
        Ok(Arc::clone(locks.entry(key.clone()).or_default()))
    }
}

/// In-memory accounts, charges, referral relations, and prepaid codes
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long `get_for_update` waits before failing with `Timeout`
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Number of committed charges across all accounts
    pub fn charge_count(&self) -> Result<usize, PortError> {
        Ok(self.shared.tables()?.charges.len())
    }
}

impl DomainPort for InMemoryLedgerStore {}

#[async_trait]
impl HealthCheckable for InMemoryLedgerStore {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        match self.shared.tables() {
            Ok(_) => HealthCheckResult::healthy("ledger-memory", start.elapsed().as_millis() as u64),
            Err(e) => HealthCheckResult::unhealthy("ledger-memory", start.elapsed().as_millis() as u64, e.to_string()),
        }
    }
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    async fn get_read_only(&self, user_id: &UserId) -> Result<Account, PortError> {
        self.shared
            .tables()?
            .accounts
            .get(user_id)
            .filter(|account| !account.deleted)
            .cloned()
            .ok_or_else(|| PortError::not_found("Account", user_id))
    }

    async fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: &Pagination,
    ) -> Result<(Vec<Account>, u64), PortError> {
        validate_page(page)?;
        let mut accounts: Vec<Account> = self
            .shared
            .tables()?
            .accounts
            .values()
            .filter(|account| filter.matches(account))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| (a.created_at, &a.user_id).cmp(&(b.created_at, &b.user_id)));
        if page.sort == SortDirection::Descending {
            accounts.reverse();
        }
        let total = accounts.len() as u64;
        Ok((page.slice(accounts), total))
    }

    async fn list_invitees(
        &self,
        inviter: &UserId,
        page: &Pagination,
    ) -> Result<(Vec<Invitee>, u64), PortError> {
        validate_page(page)?;
        let mut invitees: Vec<Invitee> = self
            .shared
            .tables()?
            .invitees
            .values()
            .filter(|relation| relation.inviter == *inviter)
            .cloned()
            .collect();
        invitees.sort_by(|a, b| (a.created_at, &a.invitee).cmp(&(b.created_at, &b.invitee)));
        if page.sort == SortDirection::Descending {
            invitees.reverse();
        }
        let total = invitees.len() as u64;
        Ok((page.slice(invitees), total))
    }
}

#[async_trait]
impl ChargeLedger for InMemoryLedgerStore {
    async fn query(&self, filter: &ChargeFilter, page: &Pagination) -> Result<Vec<Charge>, PortError> {
        validate_page(page)?;
        let tables = self.shared.tables()?;
        let mut matching: Vec<&(u64, Charge)> = tables
            .charges
            .iter()
            .filter(|(_, charge)| filter.matches(charge))
            .collect();
        matching.sort_by(|(seq_a, a), (seq_b, b)| (a.charge_time, seq_a).cmp(&(b.charge_time, seq_b)));
        if page.sort == SortDirection::Descending {
            matching.reverse();
        }
        Ok(page.slice(matching.into_iter().map(|(_, charge)| charge.clone())))
    }

    async fn aggregate_total(&self, filter: &ChargeFilter) -> Result<ChargeTotals, PortError> {
        let tables = self.shared.tables()?;
        Ok(ChargeTotals::of(
            tables
                .charges
                .iter()
                .map(|(_, charge)| charge)
                .filter(|charge| filter.matches(charge)),
        ))
    }
}

#[async_trait]
impl PreChargeStore for InMemoryLedgerStore {
    async fn get_precharge(&self, code: &str) -> Result<PreCharge, PortError> {
        self.shared
            .tables()?
            .precharges
            .get(code)
            .filter(|precharge| !precharge.deleted)
            .cloned()
            .ok_or_else(|| PortError::not_found("PreCharge", code))
    }

    async fn list_precharges(
        &self,
        filter: &PreChargeFilter,
        page: &Pagination,
    ) -> Result<(Vec<PreCharge>, u64), PortError> {
        validate_page(page)?;
        let mut precharges: Vec<PreCharge> = self
            .shared
            .tables()?
            .precharges
            .values()
            .filter(|precharge| filter.matches(precharge))
            .cloned()
            .collect();
        precharges.sort_by(|a, b| (b.created_at, &b.code).cmp(&(a.created_at, &a.code)));
        let total = precharges.len() as u64;
        Ok((page.slice(precharges), total))
    }
}

#[async_trait]
impl LedgerTransactionManager for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, PortError> {
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            lock_timeout: self.lock_timeout,
            guards: HashMap::new(),
            accounts: HashMap::new(),
            inserted: HashSet::new(),
            charges: Vec::new(),
            invitees: HashMap::new(),
            precharges: HashMap::new(),
            inserted_codes: HashSet::new(),
        }))
    }
}

fn validate_page(page: &Pagination) -> Result<(), PortError> {
    page.validate().map_err(|e| PortError::validation(e.to_string()))
}

/// A transaction over [`InMemoryLedgerStore`]
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    lock_timeout: Duration,
    guards: HashMap<LockKey, OwnedMutexGuard<()>>,
    accounts: HashMap<UserId, Account>,
    inserted: HashSet<UserId>,
    charges: Vec<Charge>,
    invitees: HashMap<UserId, Invitee>,
    precharges: HashMap<String, PreCharge>,
    inserted_codes: HashSet<String>,
}

impl InMemoryTransaction {
    async fn lock(&mut self, key: LockKey) -> Result<(), PortError> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }
        let mutex = self.shared.row_lock(&key)?;
        let guard = tokio::time::timeout(self.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| PortError::timeout(format!("lock {key}"), self.lock_timeout.as_millis() as u64))?;
        self.guards.insert(key, guard);
        Ok(())
    }

    fn require_lock(&self, key: LockKey) -> Result<(), PortError> {
        if self.guards.contains_key(&key) {
            Ok(())
        } else {
            Err(PortError::internal(format!("{key} is not locked by this transaction")))
        }
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn get_for_update(&mut self, user_id: &UserId) -> Result<Account, PortError> {
        self.lock(LockKey::Account(user_id.clone())).await?;
        let account = match self.accounts.get(user_id) {
            Some(staged) => Some(staged.clone()),
            None => self.shared.tables()?.accounts.get(user_id).cloned(),
        };
        account
            .filter(|account| !account.deleted)
            .ok_or_else(|| PortError::not_found("Account", user_id))
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), PortError> {
        self.lock(LockKey::Account(account.user_id.clone())).await?;
        let exists = self.accounts.contains_key(&account.user_id)
            || self.shared.tables()?.accounts.contains_key(&account.user_id);
        if exists {
            return Err(PortError::conflict(format!("account {} already exists", account.user_id)));
        }
        self.inserted.insert(account.user_id.clone());
        self.accounts.insert(account.user_id.clone(), account.clone());
        Ok(())
    }

    async fn save_account(&mut self, account: &Account) -> Result<(), PortError> {
        self.require_lock(LockKey::Account(account.user_id.clone()))?;
        self.accounts.insert(account.user_id.clone(), account.clone());
        Ok(())
    }

    async fn has_top_up(&mut self, user_id: &UserId, include_debits: bool) -> Result<bool, PortError> {
        let qualifies =
            |charge: &Charge| charge.user_id == *user_id && charge.charge_type.counts_as_top_up(charge.value, include_debits);
        if self.charges.iter().any(qualifies) {
            return Ok(true);
        }
        Ok(self.shared.tables()?.charges.iter().any(|(_, charge)| qualifies(charge)))
    }

    async fn append_charge(&mut self, charge: NewCharge) -> Result<Charge, PortError> {
        let charge = charge.into_charge(Utc::now());
        self.charges.push(charge.clone());
        Ok(charge)
    }

    async fn get_invitee_for_update(&mut self, invitee: &UserId) -> Result<Option<Invitee>, PortError> {
        self.lock(LockKey::Account(invitee.clone())).await?;
        if let Some(staged) = self.invitees.get(invitee) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.shared.tables()?.invitees.get(invitee).cloned())
    }

    async fn save_invitee(&mut self, relation: &Invitee) -> Result<(), PortError> {
        self.lock(LockKey::Account(relation.invitee.clone())).await?;
        self.invitees.insert(relation.invitee.clone(), relation.clone());
        Ok(())
    }

    async fn insert_precharge(&mut self, precharge: &PreCharge) -> Result<(), PortError> {
        self.lock(LockKey::Code(precharge.code.clone())).await?;
        let exists = self.precharges.contains_key(&precharge.code)
            || self.shared.tables()?.precharges.contains_key(&precharge.code);
        if exists {
            return Err(PortError::conflict(format!("prepaid code {} already exists", precharge.code)));
        }
        self.inserted_codes.insert(precharge.code.clone());
        self.precharges.insert(precharge.code.clone(), precharge.clone());
        Ok(())
    }

    async fn get_precharge_for_update(&mut self, code: &str) -> Result<Option<PreCharge>, PortError> {
        self.lock(LockKey::Code(code.to_string())).await?;
        let precharge = match self.precharges.get(code) {
            Some(staged) => Some(staged.clone()),
            None => self.shared.tables()?.precharges.get(code).cloned(),
        };
        Ok(precharge.filter(|precharge| !precharge.deleted))
    }

    async fn save_precharge(&mut self, precharge: &PreCharge) -> Result<(), PortError> {
        self.require_lock(LockKey::Code(precharge.code.clone()))?;
        self.precharges.insert(precharge.code.clone(), precharge.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        let mut tx = *self;
        {
            let mut tables = tx.shared.tables()?;
            for id in &tx.inserted {
                if tables.accounts.contains_key(id) {
                    return Err(PortError::conflict(format!("account {id} already exists")));
                }
            }
            for code in &tx.inserted_codes {
                if tables.precharges.contains_key(code) {
                    return Err(PortError::conflict(format!("prepaid code {code} already exists")));
                }
            }
            for (id, account) in tx.accounts.drain() {
                tables.accounts.insert(id, account);
            }
            for (id, relation) in tx.invitees.drain() {
                tables.invitees.insert(id, relation);
            }
            for (code, precharge) in tx.precharges.drain() {
                tables.precharges.insert(code, precharge);
            }
            for charge in tx.charges.drain(..) {
                let seq = tables.next_seq;
                tables.next_seq += 1;
                tables.charges.push((seq, charge));
            }
        }
        debug!(locks = tx.guards.len(), "in-memory transaction committed");
        tx.guards.clear();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PortError> {
        Ok(())
    }
}

/// In-memory order book standing in for the metering system
#[derive(Debug, Default)]
pub struct InMemoryOrderSource {
    orders: Mutex<HashMap<OrderId, Order>>,
}

impl InMemoryOrderSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn orders(&self) -> Result<MutexGuard<'_, HashMap<OrderId, Order>>, PortError> {
        self.orders
            .lock()
            .map_err(|_| PortError::internal("order book lock poisoned"))
    }

    /// Inserts or replaces an order
    pub fn upsert(&self, order: Order) -> Result<(), PortError> {
        self.orders()?.insert(order.order_id.clone(), order);
        Ok(())
    }

    pub fn get(&self, order_id: &OrderId) -> Result<Option<Order>, PortError> {
        Ok(self.orders()?.get(order_id).cloned())
    }
}

impl DomainPort for InMemoryOrderSource {}

#[async_trait]
impl OrderSource for InMemoryOrderSource {
    async fn active_hourly_orders(&self, user_id: &UserId) -> Result<Vec<Order>, PortError> {
        Ok(self
            .orders()?
            .values()
            .filter(|order| order.user_id == *user_id && order.is_active_hourly())
            .cloned()
            .collect())
    }

    async fn settle_owed_orders(&self, user_id: &UserId) -> Result<u64, PortError> {
        let mut orders = self.orders()?;
        let settled = orders
            .values_mut()
            .filter(|order| order.user_id == *user_id)
            .map(|order| order.settle())
            .filter(|changed| *changed)
            .count();
        Ok(settled as u64)
    }
}
