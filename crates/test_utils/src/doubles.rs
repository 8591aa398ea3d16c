//! Test doubles for the ledger's neighbour ports

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use core_kernel::{DomainPort, Money, OperationMetadata, PortError, UserId};
use domain_ledger::{ChargeNotification, ExternalBalanceProvider, Notifier};

/// Notifier that records every notification it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<ChargeNotification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records notifications but reports every delivery as failed
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn received(&self) -> Vec<ChargeNotification> {
        self.received.lock().unwrap().clone()
    }

    /// Polls until at least `count` notifications arrived or one second passed
    pub async fn wait_for(&self, count: usize) -> Vec<ChargeNotification> {
        for _ in 0..100 {
            let received = self.received();
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.received()
    }
}

impl DomainPort for RecordingNotifier {}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn account_charged(&self, notification: ChargeNotification) -> Result<(), PortError> {
        self.received.lock().unwrap().push(notification);
        if self.fail {
            return Err(PortError::ServiceUnavailable {
                service: "notifier".to_string(),
            });
        }
        Ok(())
    }
}

/// External balance provider returning a fixed balance, or failing when unset
#[derive(Debug, Default)]
pub struct StubExternalBalance {
    balance: Option<Money>,
}

impl StubExternalBalance {
    pub fn returning(balance: Money) -> Self {
        Self { balance: Some(balance) }
    }

    pub fn unavailable() -> Self {
        Self { balance: None }
    }
}

impl DomainPort for StubExternalBalance {}

#[async_trait]
impl ExternalBalanceProvider for StubExternalBalance {
    async fn balance(&self, _user_id: &UserId, _metadata: &OperationMetadata) -> Result<Money, PortError> {
        self.balance.ok_or(PortError::ServiceUnavailable {
            service: "external-balance".to_string(),
        })
    }
}
