//! Per-request caller context

use core_kernel::{OperationMetadata, UserId};

/// Identity of the caller, passed explicitly through every ledger call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Actor recorded as the operator of resulting charges
    pub operator: UserId,
    pub roles: Vec<String>,
    pub correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new(operator: impl Into<UserId>) -> Self {
        Self {
            operator: operator.into(),
            roles: Vec::new(),
            correlation_id: None,
        }
    }

    /// Context for charges the ledger raises on its own behalf
    pub fn system() -> Self {
        Self::new("system")
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Metadata forwarded to adapters that call out of process
    pub fn metadata(&self) -> OperationMetadata {
        let metadata = match &self.correlation_id {
            Some(id) => OperationMetadata::with_correlation_id(id.clone()),
            None => OperationMetadata::default(),
        };
        metadata.initiated_by(self.operator.as_str())
    }
}
