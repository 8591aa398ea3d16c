//! Ledger Domain
//!
//! This crate owns tenant balances and their audit trail:
//!
//! - Accounts with signed balances and a derived `owed` flag
//! - An append-only charge history with filtered, paginated queries
//! - Top-up bonuses and one-time referral rewards
//! - Prepaid codes redeemed as coupon credits, and balance freezing
//! - Projection of how long a balance lasts at the current hourly burn rate
//!
//! [`LedgerService`] composes these into atomic operations over the storage
//! ports defined in [`ports`].

pub mod account;
pub mod adapters;
pub mod bonus;
pub mod charge;
pub mod config;
pub mod context;
pub mod error;
pub mod estimator;
pub mod invitee;
pub mod order;
pub mod ports;
pub mod precharge;
pub mod referral;
pub mod service;

pub use account::{Account, AccountFilter, NewAccount, DEFAULT_LEVEL, MAX_LEVEL, MIN_LEVEL, OVERDRAFT_LEVEL};
pub use bonus::BonusCalculator;
pub use charge::{
    Charge, ChargeFilter, ChargePage, ChargeTotals, ChargeType, NewCharge, Pagination, SortDirection,
};
pub use config::{BonusPolicy, BonusTier, LedgerConfig};
pub use context::RequestContext;
pub use error::LedgerError;
pub use estimator::{BalanceEstimator, PerDayEstimate, ALREADY_OWED, NO_PROJECTION};
pub use invitee::Invitee;
pub use order::{BillMethod, Order, OrderStatus};
pub use ports::{
    AccountStore, ChargeLedger, ChargeNotification, ExternalBalanceProvider, LedgerBackend, LedgerTransaction,
    LedgerTransactionManager, Notifier, OrderSource, PreChargeStore,
};
pub use precharge::{NewPreCharges, PreCharge, PreChargeFilter, PreChargePage, CODE_LENGTH, MAX_BATCH_SIZE};
pub use referral::{ReferralRewardEngine, Reward};
pub use service::{
    AccountPage, AccountView, BalanceSource, ChargeOutcome, ChargeRequest, InviteePage, LedgerService,
    PreChargeRedemption, TransferOutcome, TransferRequest,
};
