//! Trait definitions for external collaborators.

use async_trait::async_trait;

use super::error::CollaboratorError;
use super::types::{
    AuditSummary, DispatchResults, FixProposal, GenerateOutcome, GenerateRequest, PublishResults,
    Trigger,
};
use crate::ledger::Product;

/// Deploys products.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deploy every id. Failures are reported per id in the result map.
    async fn publish_batch(&self, ids: &[String]) -> Result<PublishResults, CollaboratorError>;
}

/// Pushes promotions for a product to marketing channels.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Promote on `channels`, or on every channel the dispatcher knows when `None`.
    async fn dispatch(
        &self,
        product_id: &str,
        channels: Option<&[String]>,
    ) -> Result<DispatchResults, CollaboratorError>;
}

/// Diagnoses a failed generation run and optionally repairs its cause.
#[async_trait]
pub trait ErrorAnalysisHook: Send + Sync {
    async fn analyze_and_fix(
        &self,
        error: &str,
        context: &str,
    ) -> Result<FixProposal, CollaboratorError>;

    /// Apply a proposed fix. Returns whether it was applied.
    async fn apply_fix(&self, fix: &FixProposal) -> Result<bool, CollaboratorError>;
}

/// Source of externally requested actions.
#[async_trait]
pub trait TriggerSource: Send + Sync {
    /// Take every pending trigger.
    async fn poll(&self) -> Result<Vec<Trigger>, CollaboratorError>;
}

/// Periodic audit and price optimization.
#[async_trait]
pub trait Auditor: Send + Sync {
    async fn audit_and_optimize(
        &self,
        products: &[Product],
    ) -> Result<AuditSummary, CollaboratorError>;
}

/// Runs the primary generation step.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run once to completion. A non-zero exit is reported in the outcome,
    /// not as an error.
    async fn generate(&self, request: &GenerateRequest)
        -> Result<GenerateOutcome, CollaboratorError>;
}
