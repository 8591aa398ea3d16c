//! Infrastructure Database Layer
//!
//! PostgreSQL storage for the ledger using SQLx.
//!
//! # Architecture
//!
//! The crate follows the repository pattern: [`repositories`] hold the SQL
//! and row types, [`adapters`] implement the `domain_ledger` ports on top
//! of them.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{apply_schema, create_pool, DatabaseConfig, PgLedgerStore, PgOrderSource};
//!
//! let config = DatabaseConfig::new("postgres://localhost/ledger");
//! let pool = create_pool(&config).await?;
//! apply_schema(&pool).await?;
//! let store = PgLedgerStore::new(pool.clone()).with_lock_timeout(config.lock_timeout);
//! let orders = PgOrderSource::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;
pub mod schema;

pub use adapters::{PgLedgerStore, PgLedgerTransaction, PgOrderSource};
pub use error::DatabaseError;
pub use pool::{create_pool, DatabaseConfig, DatabasePool};
pub use schema::{apply_schema, LEDGER_SCHEMA};
