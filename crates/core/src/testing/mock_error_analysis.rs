//! Mock error analysis hook for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::collaborators::{CollaboratorError, ErrorAnalysisHook, FixProposal};

/// A recorded analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAnalysis {
    pub error: String,
    pub context: String,
}

/// Mock implementation of the ErrorAnalysisHook trait.
///
/// Proposes nothing (confidence 0) until configured.
#[derive(Debug)]
pub struct MockErrorAnalysis {
    proposal: Arc<RwLock<FixProposal>>,
    apply_result: Arc<RwLock<bool>>,
    analyses: Arc<RwLock<Vec<RecordedAnalysis>>>,
    applied: Arc<RwLock<Vec<FixProposal>>>,
}

impl Default for MockErrorAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

impl MockErrorAnalysis {
    pub fn new() -> Self {
        Self {
            proposal: Arc::new(RwLock::new(FixProposal::none())),
            apply_result: Arc::new(RwLock::new(true)),
            analyses: Arc::new(RwLock::new(Vec::new())),
            applied: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Propose a fix with the given confidence.
    pub async fn set_confidence(&self, confidence: f32) {
        *self.proposal.write().await = FixProposal {
            confidence,
            fix: Some(serde_json::json!({ "action": "mock-fix" })),
            summary: "mock fix".to_string(),
        };
    }

    /// Set what `apply_fix` returns.
    pub async fn set_apply_result(&self, applied: bool) {
        *self.apply_result.write().await = applied;
    }

    pub async fn recorded_analyses(&self) -> Vec<RecordedAnalysis> {
        self.analyses.read().await.clone()
    }

    pub async fn applied_count(&self) -> usize {
        self.applied.read().await.len()
    }
}

#[async_trait]
impl ErrorAnalysisHook for MockErrorAnalysis {
    async fn analyze_and_fix(
        &self,
        error: &str,
        context: &str,
    ) -> Result<FixProposal, CollaboratorError> {
        self.analyses.write().await.push(RecordedAnalysis {
            error: error.to_string(),
            context: context.to_string(),
        });
        Ok(self.proposal.read().await.clone())
    }

    async fn apply_fix(&self, fix: &FixProposal) -> Result<bool, CollaboratorError> {
        self.applied.write().await.push(fix.clone());
        Ok(*self.apply_result.read().await)
    }
}
