//! Ledger Runtime
//!
//! Turns [`Settings`] into a running [`domain_ledger::LedgerService`]:
//!
//! - [`settings`] layers defaults, `ledger.toml`, and `LEDGER__*` variables
//! - [`telemetry`] installs the tracing subscriber
//! - [`bootstrap`] picks the storage backend and wires the service
//!
//! # Example
//!
//! ```rust,ignore
//! use ledger_runtime::{bootstrap, telemetry, Settings};
//!
//! let settings = Settings::load()?;
//! telemetry::init_tracing(&settings.log_level, settings.log_json)?;
//! let runtime = bootstrap::build(&settings).await?;
//! let days = runtime.service.estimate_days_to_owe(&"tenant-1".into()).await?;
//! ```

pub mod bootstrap;
pub mod settings;
pub mod telemetry;

pub use bootstrap::{BootstrapError, Runtime, RuntimeBackend};
pub use settings::{Backend, DatabaseSettings, Settings};
