//! Repository implementations
//!
//! Repositories own the SQL and the row types for each table group.
//! Statements that must run under a caller's transaction live in
//! [`ledger::locked`] and take a `&mut PgConnection`.

pub mod ledger;
pub mod orders;

pub use ledger::LedgerRepository;
pub use orders::OrderRepository;
