//! Tests for core_kernel error types

use core_kernel::error::CoreError;
use core_kernel::money::MoneyError;
use core_kernel::PortError;

#[test]
fn test_core_error_validation() {
    let error = CoreError::validation("Invalid limit");

    match error {
        CoreError::Validation(msg) => assert_eq!(msg, "Invalid limit"),
        _ => panic!("Expected Validation error"),
    }
}

#[test]
fn test_core_error_not_found() {
    let error = CoreError::not_found("Account not found");
    assert!(matches!(error, CoreError::NotFound(_)));
}

#[test]
fn test_core_error_from_money_error() {
    let core_error: CoreError = MoneyError::DivisionByZero.into();
    assert!(matches!(core_error, CoreError::Money(MoneyError::DivisionByZero)));
    assert!(core_error.to_string().contains("Division by zero"));
}

#[test]
fn test_port_error_field_validation() {
    let error = PortError::validation_field("must be non-negative", "offset");
    match error {
        PortError::Validation { field, .. } => assert_eq!(field.as_deref(), Some("offset")),
        _ => panic!("Expected Validation error"),
    }
}
