//! Order repository
//!
//! The `orders` table is written by the metering system; the ledger only
//! reads active hourly orders and clears `owed` flags after a top-up.

use rust_decimal::Decimal;
use sqlx::PgPool;

use core_kernel::{Money, OrderId, UserId};
use domain_ledger::{BillMethod, Order, OrderStatus};

use crate::error::DatabaseError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub order_id: String,
    pub user_id: String,
    pub unit_price: Decimal,
    pub bill_method: String,
    pub status: String,
    pub owed: bool,
    pub charged: bool,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let bill_method = BillMethod::parse(&row.bill_method).ok_or_else(|| {
            DatabaseError::CorruptRow(format!("order {} has bill_method '{}'", row.order_id, row.bill_method))
        })?;
        let status = OrderStatus::parse(&row.status)
            .ok_or_else(|| DatabaseError::CorruptRow(format!("order {} has status '{}'", row.order_id, row.status)))?;

        Ok(Order {
            order_id: OrderId::new(row.order_id),
            user_id: UserId::new(row.user_id),
            unit_price: Money::new(row.unit_price),
            bill_method,
            status,
            owed: row.owed,
            charged: row.charged,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn active_hourly(&self, user_id: &UserId) -> Result<Vec<OrderRow>, DatabaseError> {
        Ok(sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT order_id, user_id, unit_price, bill_method, status, owed, charged
            FROM orders
            WHERE user_id = $1 AND status = 'active' AND bill_method = 'hour'
            ORDER BY order_id
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn settle_owed(&self, user_id: &UserId) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET owed = FALSE, charged = TRUE, updated_at = now()
            WHERE user_id = $1 AND owed AND status <> 'deleted'
            "#,
        )
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Inserts or replaces an order row
    pub async fn upsert(&self, order: &Order) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, user_id, unit_price, bill_method, status, owed, charged)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (order_id) DO UPDATE
            SET unit_price = EXCLUDED.unit_price,
                bill_method = EXCLUDED.bill_method,
                status = EXCLUDED.status,
                owed = EXCLUDED.owed,
                charged = EXCLUDED.charged,
                updated_at = now()
            "#,
        )
        .bind(order.order_id.as_str())
        .bind(order.user_id.as_str())
        .bind(order.unit_price.amount())
        .bind(order.bill_method.as_str())
        .bind(order.status.as_str())
        .bind(order.owed)
        .bind(order.charged)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
