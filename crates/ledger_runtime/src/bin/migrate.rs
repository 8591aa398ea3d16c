//! Ledger schema migration
//!
//! Applies the ledger schema to the configured PostgreSQL database.
//!
//! # Usage
//!
//! ```bash
//! LEDGER__DATABASE__URL=postgres://ledger@localhost/ledger ledger-migrate
//! ```

use anyhow::{bail, Context};
use tracing::info;

use core_kernel::{AdapterHealth, HealthCheckable};
use infra_db::{apply_schema, create_pool, PgLedgerStore};
use ledger_runtime::{telemetry, Backend, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    telemetry::init_tracing(&settings.log_level, settings.log_json).context("installing tracing subscriber")?;

    if settings.backend != Backend::Postgres {
        bail!("ledger-migrate requires the postgres backend, got {:?}", settings.backend);
    }

    let config = settings.database.to_pool_config();
    let pool = create_pool(&config).await.context("connecting to database")?;
    apply_schema(&pool).await.context("applying ledger schema")?;

    let health = PgLedgerStore::new(pool).health_check().await;
    if health.status != AdapterHealth::Healthy {
        bail!("database unhealthy after migration: {}", health.message.unwrap_or_default());
    }
    info!(latency_ms = health.latency_ms, "ledger schema ready");
    Ok(())
}
