//! Ledger adapters
//!
//! Process-local implementations of the ledger ports. The PostgreSQL
//! backend lives in `infra_db`.

pub mod memory;
pub mod notifier;

pub use memory::{InMemoryLedgerStore, InMemoryOrderSource, InMemoryTransaction};
pub use notifier::TracingNotifier;
