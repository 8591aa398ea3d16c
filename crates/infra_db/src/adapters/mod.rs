//! Domain Adapters
//!
//! PostgreSQL implementations of the ledger ports. Each adapter translates
//! between domain types and the row types in [`crate::repositories`] and
//! maps database errors onto `PortError`.

pub mod ledger;
pub mod orders;

pub use ledger::{PgLedgerStore, PgLedgerTransaction};
pub use orders::PgOrderSource;
