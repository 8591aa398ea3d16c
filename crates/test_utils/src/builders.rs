//! Test Data Builders
//!
//! Builders with sensible defaults so tests only spell out the fields they
//! care about, plus [`LedgerHarness`] which wires a [`LedgerService`] over
//! the in-memory backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use core_kernel::{Money, OrderId, UserId};
use domain_ledger::adapters::{InMemoryLedgerStore, InMemoryOrderSource};
use domain_ledger::{
    Account, AccountStore, BillMethod, ChargeOutcome, ChargeRequest, LedgerConfig, LedgerService, NewAccount,
    Order, OrderStatus, RequestContext, DEFAULT_LEVEL,
};

use crate::doubles::RecordingNotifier;
use crate::fixtures::{TemporalFixtures, UserFixtures};

/// Builder for account records
pub struct TestAccountBuilder {
    user_id: UserId,
    balance: Money,
    level: i32,
    created_at: DateTime<Utc>,
}

impl Default for TestAccountBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAccountBuilder {
    pub fn new() -> Self {
        Self {
            user_id: UserFixtures::tenant(),
            balance: Money::ZERO,
            level: DEFAULT_LEVEL,
            created_at: TemporalFixtures::jan_1(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_balance(mut self, balance: Money) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Builds the account; `owed` follows the balance
    pub fn build(self) -> Account {
        let mut account = Account::open(self.user_id, self.level, None, self.created_at)
            .unwrap_or_else(|e| panic!("invalid test account: {e}"));
        account.balance = self.balance;
        account.owed = self.balance.is_negative();
        account
    }
}

/// Builder for orders
pub struct TestOrderBuilder {
    order_id: OrderId,
    user_id: UserId,
    unit_price: Money,
    bill_method: BillMethod,
    status: OrderStatus,
    owed: bool,
}

impl TestOrderBuilder {
    /// An active hourly order
    pub fn hourly(order_id: impl Into<OrderId>, unit_price: Money) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: UserFixtures::tenant(),
            unit_price,
            bill_method: BillMethod::Hour,
            status: OrderStatus::Active,
            owed: false,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn billed(mut self, bill_method: BillMethod) -> Self {
        self.bill_method = bill_method;
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn owed(mut self) -> Self {
        self.owed = true;
        self
    }

    pub fn build(self) -> Order {
        let mut order = Order::hourly(self.order_id, self.user_id, self.unit_price);
        order.bill_method = self.bill_method;
        order.status = self.status;
        order.owed = self.owed;
        order
    }
}

/// A ledger service over the in-memory backend with a recording notifier
pub struct LedgerHarness {
    pub service: Arc<LedgerService>,
    pub store: InMemoryLedgerStore,
    pub orders: Arc<InMemoryOrderSource>,
    pub notifier: Arc<RecordingNotifier>,
}

impl LedgerHarness {
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_notifier(config, RecordingNotifier::new())
    }

    pub fn with_notifier(config: LedgerConfig, notifier: RecordingNotifier) -> Self {
        let store = InMemoryLedgerStore::new();
        let orders = Arc::new(InMemoryOrderSource::new());
        let notifier = Arc::new(notifier);
        let service = LedgerService::new(config, Arc::new(store.clone()), orders.clone(), notifier.clone());
        Self {
            service: Arc::new(service),
            store,
            orders,
            notifier,
        }
    }

    /// The context used by the harness helpers
    pub fn operator() -> RequestContext {
        UserFixtures::accountant()
    }

    pub async fn open(&self, user_id: &str) -> Account {
        self.service
            .create_account(&Self::operator(), NewAccount::new(user_id))
            .await
            .unwrap_or_else(|e| panic!("failed to open {user_id}: {e}"))
    }

    pub async fn open_invited(&self, user_id: &str, inviter: &str) -> Account {
        self.service
            .create_account(&Self::operator(), NewAccount::new(user_id).invited_by(inviter))
            .await
            .unwrap_or_else(|e| panic!("failed to open {user_id}: {e}"))
    }

    pub async fn top_up(&self, user_id: &str, units: i64) -> ChargeOutcome {
        self.service
            .apply_charge(&Self::operator(), ChargeRequest::top_up(user_id, Money::from_units(units)))
            .await
            .unwrap_or_else(|e| panic!("top-up of {user_id} failed: {e}"))
    }

    pub async fn balance(&self, user_id: &str) -> Money {
        self.account(user_id).await.balance
    }

    pub async fn account(&self, user_id: &str) -> Account {
        self.store
            .get_read_only(&UserId::from(user_id))
            .await
            .unwrap_or_else(|e| panic!("failed to read {user_id}: {e}"))
    }

    pub fn add_order(&self, order: Order) {
        self.orders
            .upsert(order)
            .unwrap_or_else(|e| panic!("failed to add order: {e}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_builder_derives_owed() {
        let account = TestAccountBuilder::new().with_balance(Money::from_units(-5)).build();
        assert!(account.owed);
        assert!(account.is_consistent());
    }

    #[test]
    fn test_order_builder_defaults_to_active_hourly() {
        let order = TestOrderBuilder::hourly("o-1", Money::from_units(1)).build();
        assert!(order.is_active_hourly());
        assert!(!order.owed);
    }

    #[tokio::test]
    async fn test_harness_round_trip() {
        let h = LedgerHarness::new(LedgerConfig::default());
        h.open("tenant-1").await;
        h.top_up("tenant-1", 25).await;
        assert_eq!(h.balance("tenant-1").await, Money::from_units(25));
    }
}
