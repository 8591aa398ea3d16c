//! Ledger flows against PostgreSQL in a container
//!
//! Run with `cargo test -p ledger_runtime -- --ignored` on a host with docker.

use std::sync::Arc;

use chrono::{Duration, Utc};
use core_kernel::{Money, UserId};
use domain_ledger::{
    AccountStore, ChargeFilter, ChargeRequest, ChargeType, LedgerConfig, LedgerError, LedgerService,
    LedgerTransaction, LedgerTransactionManager, NewAccount, NewPreCharges, OrderSource, Pagination,
    PreChargeFilter, PreChargeStore,
};
use infra_db::repositories::OrderRepository;
use test_utils::{
    assert_charges_ascending, create_isolated_test_database, ConfigFixtures, RecordingNotifier, TestDatabase,
    TestOrderBuilder, TemporalFixtures, UserFixtures,
};

fn service(db: &TestDatabase, config: LedgerConfig) -> LedgerService {
    LedgerService::new(
        config,
        Arc::new(db.ledger_store()),
        Arc::new(db.order_source()),
        Arc::new(RecordingNotifier::new()),
    )
}

mod postgres_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_referral_flow_persists() {
        let db = create_isolated_test_database().await.unwrap();
        let ledger = service(&db, ConfigFixtures::referral());
        let ops = UserFixtures::accountant();

        ledger.create_account(&ops, NewAccount::new("alice")).await.unwrap();
        ledger
            .create_account(&ops, NewAccount::new("bob").invited_by("alice"))
            .await
            .unwrap();

        let outcome = ledger
            .apply_charge(&ops, ChargeRequest::top_up("bob", Money::from_units(150)).trading_number("pay-1"))
            .await
            .unwrap();
        assert!(outcome.is_first_charge);
        assert!(outcome.reward.is_some());

        let second = ledger
            .apply_charge(&ops, ChargeRequest::top_up("bob", Money::from_units(150)))
            .await
            .unwrap();
        assert!(!second.is_first_charge);
        assert!(second.reward.is_none());

        let store = db.ledger_store();
        assert_eq!(store.get_read_only(&UserId::from("alice")).await.unwrap().balance, Money::from_units(10));
        assert_eq!(store.get_read_only(&UserId::from("bob")).await.unwrap().balance, Money::from_units(300));

        let page = ledger
            .list_charges(&ChargeFilter::for_user("bob"), &Pagination::all().ascending())
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.charges[0].trading_number.as_deref(), Some("pay-1"));
        assert_charges_ascending(&page.charges);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_duplicate_account_is_rejected() {
        let db = create_isolated_test_database().await.unwrap();
        let ledger = service(&db, LedgerConfig::default());
        let ops = UserFixtures::accountant();

        ledger.create_account(&ops, NewAccount::new("tenant-1")).await.unwrap();
        let err = ledger.create_account(&ops, NewAccount::new("tenant-1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountExists(_)));
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_contended_lock_times_out() {
        let db = create_isolated_test_database().await.unwrap();
        let ledger = service(&db, LedgerConfig::default());
        let ops = UserFixtures::accountant();
        ledger.create_account(&ops, NewAccount::new("tenant-1")).await.unwrap();

        let store = db.ledger_store();
        let mut holder = store.begin().await.unwrap();
        holder.get_for_update(&UserId::from("tenant-1")).await.unwrap();

        let err = ledger
            .apply_charge(&ops, ChargeRequest::top_up("tenant-1", Money::from_units(5)))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "expected a retryable error, got {err}");
        holder.rollback().await.unwrap();

        ledger
            .apply_charge(&ops, ChargeRequest::top_up("tenant-1", Money::from_units(5)))
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_top_up_settles_owed_orders() {
        let db = create_isolated_test_database().await.unwrap();
        let ledger = service(&db, LedgerConfig::default());
        let ops = UserFixtures::accountant();
        ledger.create_account(&ops, NewAccount::new("tenant-1")).await.unwrap();

        let orders = OrderRepository::new(db.pool().clone());
        orders
            .upsert(&TestOrderBuilder::hourly("vm-1", Money::from_units(1)).owed().build())
            .await
            .unwrap();

        ledger
            .apply_charge(
                &ops,
                ChargeRequest::top_up("tenant-1", Money::from_units(48)).at(TemporalFixtures::mid_january()),
            )
            .await
            .unwrap();

        let source = db.order_source();
        assert_eq!(source.settle_owed_orders(&UserId::from("tenant-1")).await.unwrap(), 0);
        assert_eq!(ledger.estimate_days_to_owe(&UserId::from("tenant-1")).await.unwrap(), 2);

        let january = ledger
            .list_charges(
                &ChargeFilter::for_user("tenant-1").within(TemporalFixtures::january()),
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(january.total_count, 1);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_prepaid_code_redeems_once() {
        let db = create_isolated_test_database().await.unwrap();
        let ledger = service(&db, LedgerConfig::default());
        let ops = UserFixtures::accountant();
        ledger.create_account(&ops, NewAccount::new("tenant-1")).await.unwrap();
        ledger.create_account(&ops, NewAccount::new("tenant-2")).await.unwrap();

        let request = NewPreCharges::new(3, Money::from_units(25), Utc::now() + Duration::days(7)).remarks("launch");
        let issued = ledger.create_precharges(&ops, request).await.unwrap();
        assert_eq!(issued.len(), 3);
        let code = issued[0].code.clone();

        let redemption = ledger.use_precharge(&ops, &code, &UserId::from("tenant-1")).await.unwrap();
        assert_eq!(redemption.balance, Money::from_units(25));
        assert_eq!(redemption.charge.charge_type, ChargeType::Coupon);

        let err = ledger.use_precharge(&ops, &code, &UserId::from("tenant-2")).await.unwrap_err();
        assert!(matches!(err, LedgerError::PreChargeUsed(_)));

        let store = db.ledger_store();
        let stored = store.get_precharge(&code).await.unwrap();
        assert!(stored.used);
        assert_eq!(stored.user_id, Some(UserId::from("tenant-1")));
        let (redeemed, total) = store
            .list_precharges(&PreChargeFilter::redeemed_by("tenant-1"), &Pagination::all())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(redeemed[0].code, code);

        ledger.delete_precharge(&ops, &issued[1].code).await.unwrap();
        let (_, live) = store
            .list_precharges(&PreChargeFilter::default(), &Pagination::all())
            .await
            .unwrap();
        assert_eq!(live, 2);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_taken_code_conflicts_without_aborting_the_transaction() {
        let db = create_isolated_test_database().await.unwrap();
        let ledger = service(&db, LedgerConfig::default());
        let ops = UserFixtures::accountant();
        let request = NewPreCharges::new(1, Money::from_units(5), Utc::now() + Duration::days(1));
        let taken = ledger.create_precharges(&ops, request).await.unwrap().remove(0);

        let store = db.ledger_store();
        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_precharge(&taken).await.unwrap_err();
        assert!(matches!(err, core_kernel::PortError::Conflict { .. }));

        let mut fresh = taken.clone();
        fresh.code = "FRESHCODE0000001".to_string();
        tx.insert_precharge(&fresh).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.get_precharge("FRESHCODE0000001").await.is_ok());
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_frozen_balance_persists() {
        let db = create_isolated_test_database().await.unwrap();
        let ledger = service(&db, LedgerConfig::default());
        let ops = UserFixtures::accountant();
        ledger.create_account(&ops, NewAccount::new("tenant-1")).await.unwrap();
        ledger
            .apply_charge(&ops, ChargeRequest::top_up("tenant-1", Money::from_units(40)))
            .await
            .unwrap();

        let user = UserId::from("tenant-1");
        ledger.freeze_balance(&ops, &user, Money::from_units(15)).await.unwrap();

        let stored = db.ledger_store().get_read_only(&user).await.unwrap();
        assert_eq!(stored.balance, Money::from_units(25));
        assert_eq!(stored.frozen_balance, Money::from_units(15));
    }
}
