//! Custom Test Assertions
//!
//! Assertion helpers for ledger types that give more meaningful failure
//! messages than bare `assert_eq!`.

use core_kernel::Money;
use domain_ledger::{Account, Charge};

/// Asserts that two Money values are equal, printing both at ledger scale
pub fn assert_money_eq(actual: Money, expected: Money) {
    assert_eq!(actual, expected, "Money mismatch: actual={}, expected={}", actual, expected);
}

/// Asserts that a Money value is positive
pub fn assert_money_positive(money: &Money) {
    assert!(money.is_positive(), "Expected positive money, got {}", money);
}

/// Asserts that a Money value is zero
pub fn assert_money_zero(money: &Money) {
    assert!(money.is_zero(), "Expected zero money, got {}", money);
}

/// Asserts that money values sum to a total
pub fn assert_money_sum_equals(parts: &[Money], total: Money) {
    let sum: Money = parts.iter().sum();
    assert_eq!(sum, total, "Sum of parts ({}) doesn't equal total ({})", sum, total);
}

/// Asserts that the account's balance plus frozen balance equals the sum of
/// its charge values
pub fn assert_balance_matches_history(account: &Account, charges: &[Charge]) {
    let sum: Money = charges.iter().map(|c| c.value).sum();
    let total = account
        .total_balance()
        .unwrap_or_else(|e| panic!("total balance of {} overflows: {e}", account.user_id));
    assert_eq!(
        total, sum,
        "Total balance of {} is {} (frozen {}) but its {} charges sum to {}",
        account.user_id,
        total,
        account.frozen_balance,
        charges.len(),
        sum
    );
}

/// Asserts that `owed` agrees with the sign of the balance
pub fn assert_account_consistent(account: &Account) {
    assert!(
        account.is_consistent(),
        "Account {} has balance {} but owed={}",
        account.user_id,
        account.balance,
        account.owed
    );
}

/// Asserts that charges are ordered newest first
pub fn assert_charges_descending(charges: &[Charge]) {
    for pair in charges.windows(2) {
        assert!(
            pair[0].charge_time >= pair[1].charge_time,
            "Charge {} at {} precedes older charge {} at {}",
            pair[0].charge_id,
            pair[0].charge_time,
            pair[1].charge_id,
            pair[1].charge_time
        );
    }
}

/// Asserts that charges are ordered oldest first
pub fn assert_charges_ascending(charges: &[Charge]) {
    for pair in charges.windows(2) {
        assert!(
            pair[0].charge_time <= pair[1].charge_time,
            "Charge {} at {} follows newer charge {} at {}",
            pair[0].charge_id,
            pair[0].charge_time,
            pair[1].charge_id,
            pair[1].charge_time
        );
    }
}

/// Asserts that a result is Ok and returns the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $msg, e),
        }
    };
}

/// Asserts that a result is Err and returns the error
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => e,
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(value) => panic!("{}: got Ok({:?})", $msg, value),
            Err(e) => e,
        }
    };
}

/// Asserts that an error matches a specific variant
#[macro_export]
macro_rules! assert_err_variant {
    ($result:expr, $pattern:pat) => {
        match $result {
            Ok(value) => panic!("Expected Err matching {}, got Ok({:?})", stringify!($pattern), value),
            Err(ref e) => {
                assert!(
                    matches!(e, $pattern),
                    "Error {:?} does not match pattern {}",
                    e,
                    stringify!($pattern)
                );
            }
        }
    };
}
