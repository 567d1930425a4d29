//! Collaborators that need no external program.

use async_trait::async_trait;

use super::error::CollaboratorError;
use super::traits::{Auditor, ErrorAnalysisHook};
use super::types::{AuditSummary, FixProposal};
use crate::ledger::{Product, ProductStatus};

/// Error analysis hook that never proposes a fix.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopErrorAnalysis;

#[async_trait]
impl ErrorAnalysisHook for NoopErrorAnalysis {
    async fn analyze_and_fix(
        &self,
        _error: &str,
        _context: &str,
    ) -> Result<FixProposal, CollaboratorError> {
        Ok(FixProposal::none())
    }

    async fn apply_fix(&self, _fix: &FixProposal) -> Result<bool, CollaboratorError> {
        Ok(false)
    }
}

/// Auditor that checks ledger records for missing fields and reprices nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsistencyAuditor;

#[async_trait]
impl Auditor for ConsistencyAuditor {
    async fn audit_and_optimize(
        &self,
        products: &[Product],
    ) -> Result<AuditSummary, CollaboratorError> {
        let mut issues = Vec::new();
        for product in products {
            let meta = &product.metadata;
            match product.status {
                ProductStatus::Published | ProductStatus::Promoted
                    if meta.deployment_url.is_none() =>
                {
                    issues.push(format!("{}: {} without deployment url", product.id, product.status));
                }
                ProductStatus::Promoted if meta.promoted_at.is_none() => {
                    issues.push(format!("{}: promoted without promoted_at", product.id));
                }
                ProductStatus::Packaged if product.package_path.is_none() => {
                    issues.push(format!("{}: packaged without package path", product.id));
                }
                ref status if status.is_failed() && meta.error.is_none() => {
                    issues.push(format!("{}: {} without error", product.id, status));
                }
                _ => {}
            }
        }

        Ok(AuditSummary {
            checked: products.len(),
            repriced: 0,
            issues,
        })
    }
}
