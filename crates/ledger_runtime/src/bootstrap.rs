//! Service bootstrap
//!
//! Builds a [`LedgerService`] over the backend named in [`Settings`]. The
//! PostgreSQL backend connects a pool but does not apply the schema; run
//! `ledger-migrate` for that.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use core_kernel::AdapterHealth;
use domain_ledger::adapters::{InMemoryLedgerStore, InMemoryOrderSource, TracingNotifier};
use domain_ledger::{ExternalBalanceProvider, LedgerService, Notifier};
use infra_db::{create_pool, DatabaseError, DatabasePool, PgLedgerStore, PgOrderSource};

use crate::settings::{Backend, Settings};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// `external_balance_enabled` was set but no provider was supplied
    #[error("external balance is enabled but no provider is configured")]
    MissingExternalBalance,

    #[error("Backend unhealthy: {0}")]
    Unhealthy(String),
}

/// Handles to the storage behind a running service
#[derive(Debug, Clone)]
pub enum RuntimeBackend {
    Memory {
        store: InMemoryLedgerStore,
        orders: Arc<InMemoryOrderSource>,
    },
    Postgres {
        pool: DatabasePool,
    },
}

pub struct Runtime {
    pub service: Arc<LedgerService>,
    pub backend: RuntimeBackend,
}

/// Options not expressible in settings files
#[derive(Default)]
pub struct Wiring {
    pub notifier: Option<Arc<dyn Notifier>>,
    pub external_balance: Option<Arc<dyn ExternalBalanceProvider>>,
}

impl Wiring {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn external_balance(mut self, provider: Arc<dyn ExternalBalanceProvider>) -> Self {
        self.external_balance = Some(provider);
        self
    }
}

/// Builds the service with the tracing notifier and no external balance
pub async fn build(settings: &Settings) -> Result<Runtime, BootstrapError> {
    build_with(settings, Wiring::default()).await
}

pub async fn build_with(settings: &Settings, wiring: Wiring) -> Result<Runtime, BootstrapError> {
    if settings.ledger.external_balance_enabled && wiring.external_balance.is_none() {
        return Err(BootstrapError::MissingExternalBalance);
    }
    let notifier = wiring.notifier.unwrap_or_else(|| Arc::new(TracingNotifier) as Arc<dyn Notifier>);

    let (service, backend) = match settings.backend {
        Backend::Memory => {
            let store = InMemoryLedgerStore::new().with_lock_timeout(settings.database.lock_timeout());
            let orders = Arc::new(InMemoryOrderSource::new());
            let service = LedgerService::new(
                settings.ledger.clone(),
                Arc::new(store.clone()),
                orders.clone(),
                notifier,
            );
            (service, RuntimeBackend::Memory { store, orders })
        }
        Backend::Postgres => {
            let config = settings.database.to_pool_config();
            let pool = create_pool(&config).await?;
            let store = PgLedgerStore::new(pool.clone()).with_lock_timeout(config.lock_timeout);
            let orders = PgOrderSource::new(pool.clone());
            let service = LedgerService::new(settings.ledger.clone(), Arc::new(store), Arc::new(orders), notifier);
            (service, RuntimeBackend::Postgres { pool })
        }
    };

    let service = match wiring.external_balance {
        Some(provider) => service.with_external_balance(provider),
        None => service,
    };

    let health = service.health().await;
    if health.status == AdapterHealth::Unhealthy {
        return Err(BootstrapError::Unhealthy(
            health.message.unwrap_or_else(|| health.adapter_id.clone()),
        ));
    }
    info!(backend = ?settings.backend, adapter = %health.adapter_id, latency_ms = health.latency_ms, "ledger service ready");

    Ok(Runtime {
        service: Arc::new(service),
        backend,
    })
}
