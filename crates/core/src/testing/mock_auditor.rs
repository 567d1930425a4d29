//! Mock auditor for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::collaborators::{AuditSummary, Auditor, CollaboratorError};
use crate::ledger::Product;

/// Mock implementation of the Auditor trait.
///
/// Records the ids it was shown and reports every product as checked.
#[derive(Debug, Default)]
pub struct MockAuditor {
    calls: Arc<RwLock<Vec<Vec<String>>>>,
    issues: Arc<RwLock<Vec<String>>>,
    next_error: Arc<RwLock<Option<String>>>,
}

impl MockAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_issues(&self, issues: Vec<String>) {
        *self.issues.write().await = issues;
    }

    pub async fn fail_next(&self, message: &str) {
        *self.next_error.write().await = Some(message.to_string());
    }

    /// Product ids seen by each audit pass.
    pub async fn recorded_calls(&self) -> Vec<Vec<String>> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl Auditor for MockAuditor {
    async fn audit_and_optimize(
        &self,
        products: &[Product],
    ) -> Result<AuditSummary, CollaboratorError> {
        self.calls
            .write()
            .await
            .push(products.iter().map(|p| p.id.clone()).collect());
        if let Some(message) = self.next_error.write().await.take() {
            return Err(CollaboratorError::failed(message));
        }
        Ok(AuditSummary {
            checked: products.len(),
            repriced: 0,
            issues: self.issues.read().await.clone(),
        })
    }
}
