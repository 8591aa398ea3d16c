//! Core Kernel - Foundational types and utilities for the tenant ledger
//!
//! This crate provides the fundamental building blocks used across the workspace:
//! - Money type with fixed-scale decimal arithmetic
//! - Time windows for ledger queries
//! - Common identifiers
//! - Port infrastructure shared by every adapter

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod error;
pub mod ports;

pub use money::{Money, MoneyError, Rate, MONEY_SCALE};
pub use temporal::{TimeRange, TemporalError};
pub use identifiers::{ChargeId, OrderId, UserId};
pub use error::CoreError;
pub use ports::{
    PortError, DomainPort, OperationMetadata,
    HealthCheckable, HealthCheckResult, AdapterHealth,
};
