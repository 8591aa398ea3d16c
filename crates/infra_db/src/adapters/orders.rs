//! PostgreSQL order source

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use core_kernel::{DomainPort, PortError, UserId};
use domain_ledger::{Order, OrderSource};

use crate::repositories::orders::OrderRepository;

#[derive(Debug, Clone)]
pub struct PgOrderSource {
    repository: OrderRepository,
}

impl PgOrderSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: OrderRepository::new(pool),
        }
    }

    pub fn repository(&self) -> &OrderRepository {
        &self.repository
    }
}

impl DomainPort for PgOrderSource {}

#[async_trait]
impl OrderSource for PgOrderSource {
    async fn active_hourly_orders(&self, user_id: &UserId) -> Result<Vec<Order>, PortError> {
        let rows = self.repository.active_hourly(user_id).await?;
        let orders = rows
            .into_iter()
            .map(Order::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    async fn settle_owed_orders(&self, user_id: &UserId) -> Result<u64, PortError> {
        let settled = self.repository.settle_owed(user_id).await?;
        debug!(user_id = %user_id, settled, "Settled owed orders");
        Ok(settled)
    }
}
