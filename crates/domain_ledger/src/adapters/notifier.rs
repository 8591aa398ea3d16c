//! Notifier that writes charge events to the log

use async_trait::async_trait;
use tracing::info;

use core_kernel::{DomainPort, PortError};

use crate::ports::{ChargeNotification, Notifier};

/// Emits one structured log line per committed charge
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl DomainPort for TracingNotifier {}

#[async_trait]
impl Notifier for TracingNotifier {
    async fn account_charged(&self, notification: ChargeNotification) -> Result<(), PortError> {
        info!(
            target: "ledger::notification",
            charge_id = %notification.charge_id,
            user_id = %notification.user_id,
            operator = %notification.operator,
            value = %notification.value,
            charge_type = %notification.charge_type,
            bonus = %notification.bonus,
            balance = %notification.balance,
            is_first_charge = notification.is_first_charge,
            "account charged"
        );
        Ok(())
    }
}
