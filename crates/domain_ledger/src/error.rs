//! Ledger domain errors

use core_kernel::{CoreError, Money, MoneyError, PortError, UserId};
use thiserror::Error;

/// Errors that can occur in the ledger domain
///
/// Validation variants are raised before any mutation. `Persistence` carries
/// the underlying port failure; the ledger guarantees nothing was committed
/// when it is returned from a mutating operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Charge value outside the caller's configured bound
    #[error("Invalid charge value {value} for account {user_id}")]
    InvalidChargeValue {
        user_id: UserId,
        value: Money,
    },

    /// Malformed request parameter (pagination bounds, identical transfer ends, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Account not found or soft-deleted
    #[error("Account not found: {0}")]
    AccountNotFound(UserId),

    /// An account with this id already exists
    #[error("Account already exists: {0}")]
    AccountExists(UserId),

    /// Account level outside 0..=9
    #[error("Invalid account level: {0}")]
    InvalidLevel(i32),

    /// Source account has nothing to transfer
    #[error("Account {user_id} has no balance to transfer (balance {balance})")]
    NoBalanceToTransfer {
        user_id: UserId,
        balance: Money,
    },

    /// Transfer amount is non-positive or exceeds the source balance
    #[error("Invalid transfer value {value} from account {user_id}")]
    InvalidTransferValue {
        user_id: UserId,
        value: Money,
    },

    /// Balance does not cover the amount to freeze
    #[error("Account {user_id} has insufficient funds: balance {balance}, requested {value}")]
    InsufficientFunds {
        user_id: UserId,
        balance: Money,
        value: Money,
    },

    /// Frozen balance does not cover the amount to unfreeze
    #[error("Account {user_id} has insufficient frozen balance: frozen {frozen_balance}, requested {value}")]
    InsufficientFrozenBalance {
        user_id: UserId,
        frozen_balance: Money,
        value: Money,
    },

    /// No live prepaid code with this value
    #[error("Prepaid code not found: {0}")]
    PreChargeNotFound(String),

    /// Prepaid code was already redeemed
    #[error("Prepaid code already used: {0}")]
    PreChargeUsed(String),

    /// Prepaid code was already handed out
    #[error("Prepaid code already dispatched: {0}")]
    PreChargeDispatched(String),

    /// Prepaid code is past its expiry
    #[error("Prepaid code expired: {0}")]
    PreChargeExpired(String),

    /// Arithmetic failure on a monetary amount
    #[error("Calculation error: {0}")]
    Calculation(#[from] MoneyError),

    /// Store unavailable, lock timeout, or transaction conflict
    #[error("Persistence failure during {context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: PortError,
    },

    /// External balance provider failed; only affects display reads
    #[error("External service failure: {0}")]
    ExternalService(#[source] PortError),
}

impl LedgerError {
    /// Wraps a port error raised while performing `context`
    pub fn persistence(context: impl Into<String>) -> impl FnOnce(PortError) -> LedgerError {
        let context = context.into();
        move |source| LedgerError::Persistence { context, source }
    }

    /// Maps a port error for an account-scoped operation, turning
    /// not-found into `AccountNotFound`
    pub fn for_account(user_id: &UserId, context: &str) -> impl FnOnce(PortError) -> LedgerError {
        let user_id = user_id.clone();
        let context = context.to_string();
        move |source| {
            if source.is_not_found() {
                LedgerError::AccountNotFound(user_id)
            } else {
                LedgerError::Persistence { context, source }
            }
        }
    }

    /// Maps a port error for a prepaid-code operation, turning not-found
    /// into `PreChargeNotFound`
    pub fn for_precharge(code: &str, context: &str) -> impl FnOnce(PortError) -> LedgerError {
        let code = code.to_string();
        let context = context.to_string();
        move |source| {
            if source.is_not_found() {
                LedgerError::PreChargeNotFound(code)
            } else {
                LedgerError::Persistence { context, source }
            }
        }
    }

    /// Returns true if the caller may retry the whole operation
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Persistence { source, .. } => source.is_transient(),
            LedgerError::ExternalService(source) => source.is_transient(),
            _ => false,
        }
    }

    /// Returns true for errors raised before touching the ledger
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidChargeValue { .. }
                | LedgerError::InvalidArgument(_)
                | LedgerError::InvalidLevel(_)
                | LedgerError::NoBalanceToTransfer { .. }
                | LedgerError::InvalidTransferValue { .. }
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::InsufficientFrozenBalance { .. }
        )
    }
}

impl From<CoreError> for LedgerError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Money(e) => LedgerError::Calculation(e),
            other => LedgerError::InvalidArgument(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_is_retryable() {
        let err = LedgerError::persistence("apply charge")(PortError::timeout("lock", 5000));
        assert!(err.is_retryable());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_not_found_maps_to_account_not_found() {
        let user = UserId::from("tenant-1");
        let err = LedgerError::for_account(&user, "load")(PortError::not_found("Account", &user));
        assert!(matches!(err, LedgerError::AccountNotFound(id) if id == user));
    }

    #[test]
    fn test_not_found_maps_to_precharge_not_found() {
        let err = LedgerError::for_precharge("ABC", "load")(PortError::not_found("PreCharge", "ABC"));
        assert!(matches!(err, LedgerError::PreChargeNotFound(code) if code == "ABC"));

        let err = LedgerError::for_precharge("ABC", "load")(PortError::timeout("lock", 10));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_message_formats_money_through_money_type() {
        let err = LedgerError::InvalidChargeValue {
            user_id: UserId::from("tenant-1"),
            value: Money::from_units(-5),
        };
        assert!(err.to_string().contains("-5.0000"));
    }
}
