//! End-to-end flows: settings document → bootstrap → ledger service

use std::sync::Arc;

use proptest::prelude::*;
use rust_decimal_macros::dec;

use core_kernel::{Money, UserId};
use domain_ledger::{
    AccountFilter, BalanceSource, ChargeFilter, ChargeRequest, ChargeType, LedgerError, NewAccount, Pagination,
    PerDayEstimate, RequestContext,
};
use ledger_runtime::bootstrap::{build, build_with, Wiring};
use ledger_runtime::{Runtime, RuntimeBackend, Settings};
use test_utils::{
    assert_account_consistent, assert_balance_matches_history, assert_charges_descending, charge_value_strategy,
    RecordingNotifier, StubExternalBalance, TestOrderBuilder, UserFixtures,
};

const SETTINGS: &str = r#"
backend = "memory"
log_level = "debug"

[database]
lock_timeout_ms = 500

[ledger]
bonus_enabled = true
referral_enabled = true
min_charge_for_referral = "100"
reward_value = "10"
reward_remarks = "invitation reward"

[ledger.charge_value_limit_by_role]
support = "50"

[[ledger.bonus_policy.tiers]]
min_value = "1000"
rate = "0.05"
"#;

async fn runtime_with(wiring: Wiring) -> Runtime {
    let settings = Settings::from_toml(SETTINGS).unwrap();
    build_with(&settings, wiring).await.unwrap()
}

fn orders(runtime: &Runtime) -> Arc<domain_ledger::adapters::InMemoryOrderSource> {
    match &runtime.backend {
        RuntimeBackend::Memory { orders, .. } => orders.clone(),
        RuntimeBackend::Postgres { .. } => panic!("expected the memory backend"),
    }
}

fn ops() -> RequestContext {
    UserFixtures::accountant()
}

mod settings_flow_tests {
    use super::*;

    #[tokio::test]
    async fn test_referred_top_up_earns_bonus_and_reward() {
        let notifier = Arc::new(RecordingNotifier::new());
        let runtime = runtime_with(Wiring::default().notifier(notifier.clone())).await;
        let service = &runtime.service;

        service.create_account(&ops(), NewAccount::new("alice")).await.unwrap();
        service
            .create_account(&ops(), NewAccount::new("bob").invited_by("alice"))
            .await
            .unwrap();

        let outcome = service
            .apply_charge(&ops(), ChargeRequest::top_up("bob", Money::from_units(1000)).come_from("card"))
            .await
            .unwrap();

        assert!(outcome.is_first_charge);
        assert_eq!(outcome.bonus.as_ref().map(|b| b.value), Some(Money::from_units(50)));
        assert_eq!(outcome.balance, Money::from_units(1050));
        let reward = outcome.reward.unwrap();
        assert_eq!(reward.user_id, UserId::from("alice"));
        assert_eq!(reward.value, Money::from_units(10));
        assert_eq!(reward.remarks.as_deref(), Some("invitation reward"));

        let page = service
            .list_charges(&ChargeFilter::for_user("bob"), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.total_value, Money::from_units(1050));
        assert_charges_descending(&page.charges);

        let invitees = service.list_invitees(&UserId::from("alice"), &Pagination::default()).await.unwrap();
        assert_eq!(invitees.total_count, 1);
        assert!(invitees.invitees[0].charged);

        assert_eq!(notifier.wait_for(2).await.len(), 2);
    }

    #[tokio::test]
    async fn test_role_limit_from_settings() {
        let runtime = runtime_with(Wiring::default()).await;
        let service = &runtime.service;
        service.create_account(&ops(), NewAccount::new("tenant-1")).await.unwrap();

        let err = service
            .apply_charge(&UserFixtures::support(), ChargeRequest::top_up("tenant-1", Money::new(dec!(50.0001))))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidChargeValue { .. }));

        service
            .apply_charge(&UserFixtures::support(), ChargeRequest::top_up("tenant-1", Money::from_units(50)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_estimates_over_bootstrapped_orders() {
        let runtime = runtime_with(Wiring::default()).await;
        let service = &runtime.service;
        service.create_account(&ops(), NewAccount::new("tenant-1")).await.unwrap();
        service
            .apply_charge(&ops(), ChargeRequest::top_up("tenant-1", Money::from_units(1000)))
            .await
            .unwrap();

        orders(&runtime)
            .upsert(TestOrderBuilder::hourly("vm-1", Money::new(dec!(6.25))).build())
            .unwrap();

        let tenant = UserId::from("tenant-1");
        assert_eq!(service.estimate_days_to_owe(&tenant).await.unwrap(), 7);
        assert_eq!(
            service.estimate_per_day(&tenant).await.unwrap(),
            PerDayEstimate {
                price_per_day: Money::from_units(150),
                remaining_days: 7,
            }
        );
    }

    #[tokio::test]
    async fn test_external_balance_wiring() {
        let mut settings = Settings::from_toml(SETTINGS).unwrap();
        settings.ledger.external_balance_enabled = true;
        let runtime = build_with(
            &settings,
            Wiring::default().external_balance(Arc::new(StubExternalBalance::returning(Money::from_units(42)))),
        )
        .await
        .unwrap();

        runtime.service.create_account(&ops(), NewAccount::new("tenant-1")).await.unwrap();
        let view = runtime.service.get_account(&ops(), &UserId::from("tenant-1")).await.unwrap();
        assert_eq!(view.balance_source, BalanceSource::External);
        assert_eq!(view.display_balance, Money::from_units(42));
        assert_eq!(view.account.balance, Money::ZERO);
    }

    #[tokio::test]
    async fn test_default_settings_boot_memory_backend() {
        let settings = Settings {
            backend: ledger_runtime::Backend::Memory,
            ..Default::default()
        };
        let runtime = build(&settings).await.unwrap();
        let accounts = runtime
            .service
            .list_accounts(&AccountFilter::default(), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(accounts.total_count, 0);
    }
}

mod convergence_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn balance_always_equals_charge_history(values in proptest::collection::vec(charge_value_strategy(), 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let runtime = runtime_with(Wiring::default()).await;
                let service = &runtime.service;
                service.create_account(&ops(), NewAccount::new("tenant-1")).await.unwrap();

                for value in &values {
                    service
                        .apply_charge(&ops(), ChargeRequest::new("tenant-1", *value, ChargeType::Consumption))
                        .await
                        .unwrap();
                }

                let account = service.get_account(&ops(), &UserId::from("tenant-1")).await.unwrap().account;
                let page = service
                    .list_charges(&ChargeFilter::for_user("tenant-1"), &Pagination::all())
                    .await
                    .unwrap();

                assert_account_consistent(&account);
                assert_balance_matches_history(&account, &page.charges);
                assert_eq!(page.total_value, account.balance);
            });
        }
    }
}
