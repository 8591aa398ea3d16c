//! Test Utilities Crate
//!
//! Shared test infrastructure for the ledger workspace.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built money, time, user, and config values
//! - `builders`: Builders for accounts and orders, plus `LedgerHarness`
//! - `doubles`: Recording notifier and stub external balance provider
//! - `database`: Testcontainers PostgreSQL with the ledger schema
//! - `assertions`: Assertion helpers for ledger types
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod doubles;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use doubles::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
