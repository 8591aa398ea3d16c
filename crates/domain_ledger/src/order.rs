//! Billing orders as seen by the ledger
//!
//! Orders are owned by the metering system. The ledger reads active hourly
//! orders to project spending and clears `owed` flags after a top-up.

use serde::{Deserialize, Serialize};
use std::fmt;

use core_kernel::{Money, OrderId, UserId};

/// Billing period of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillMethod {
    Hour,
    Month,
    Year,
}

impl BillMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillMethod::Hour => "hour",
            BillMethod::Month => "month",
            BillMethod::Year => "year",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hour" => Some(BillMethod::Hour),
            "month" => Some(BillMethod::Month),
            "year" => Some(BillMethod::Year),
            _ => None,
        }
    }
}

impl fmt::Display for BillMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    Stopped,
    Deleted,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::Stopped => "stopped",
            OrderStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(OrderStatus::Active),
            "stopped" => Some(OrderStatus::Stopped),
            "deleted" => Some(OrderStatus::Deleted),
            _ => None,
        }
    }
}

/// A billing order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    /// Price per billing period
    pub unit_price: Money,
    pub bill_method: BillMethod,
    pub status: OrderStatus,
    /// Billing for this order stopped because the account ran dry
    pub owed: bool,
    pub charged: bool,
}

impl Order {
    pub fn hourly(order_id: impl Into<OrderId>, user_id: impl Into<UserId>, unit_price: Money) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            unit_price,
            bill_method: BillMethod::Hour,
            status: OrderStatus::Active,
            owed: false,
            charged: false,
        }
    }

    /// Active and billed by the hour
    pub fn is_active_hourly(&self) -> bool {
        self.status == OrderStatus::Active && self.bill_method == BillMethod::Hour
    }

    /// Clears the owed flag after the account is topped up.
    /// Returns false if there was nothing to settle.
    pub fn settle(&mut self) -> bool {
        if !self.owed || self.status == OrderStatus::Deleted {
            return false;
        }
        self.owed = false;
        self.charged = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_skips_deleted_orders() {
        let mut order = Order::hourly("o-1", "tenant-1", Money::from_units(1));
        order.owed = true;
        order.status = OrderStatus::Deleted;
        assert!(!order.settle());
        assert!(order.owed);

        order.status = OrderStatus::Stopped;
        assert!(order.settle());
        assert!(!order.owed);
        assert!(order.charged);
    }

    #[test]
    fn test_bill_method_parse() {
        assert_eq!(BillMethod::parse("hour"), Some(BillMethod::Hour));
        assert_eq!(BillMethod::parse("week"), None);
    }
}
