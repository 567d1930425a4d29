//! Types for the orchestrator.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::ledger::LedgerError;
use crate::supervisor::SupervisorReport;

/// Errors that can fail a tick step.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Ledger error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// External collaborator error.
    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// No unhealthy companion service could be restarted.
    #[error("companion services down: {}", .0.join(", "))]
    ServicesDown(Vec<String>),

    /// The generation step failed, including its auto-fix retry.
    #[error("pipeline failure: {0}")]
    PipelineFailure(String),
}

/// One step of a tick, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    VerifyServices,
    IngestTriggers,
    RetryDeployments,
    Audit,
    Report,
    Promote,
    Generate,
    PromoteNew,
    Boost,
    AutoHeal,
}

impl Step {
    pub const ALL: [Step; 10] = [
        Step::VerifyServices,
        Step::IngestTriggers,
        Step::RetryDeployments,
        Step::Audit,
        Step::Report,
        Step::Promote,
        Step::Generate,
        Step::PromoteNew,
        Step::Boost,
        Step::AutoHeal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VerifyServices => "verify_services",
            Self::IngestTriggers => "ingest_triggers",
            Self::RetryDeployments => "retry_deployments",
            Self::Audit => "audit",
            Self::Report => "report",
            Self::Promote => "promote",
            Self::Generate => "generate",
            Self::PromoteNew => "promote_new",
            Self::Boost => "boost",
            Self::AutoHeal => "auto_heal",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    /// Disabled by configuration or not due on this tick.
    Skipped,
    Failed { error: String },
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Result of one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The breaker was open: no steps ran and the loop slept the cool-down.
    pub cooled_down: bool,
    /// Shutdown was requested before every step ran.
    pub interrupted: bool,
    pub steps: Vec<StepRecord>,
}

impl TickReport {
    pub fn failed(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
    }

    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.outcome)
    }

    pub fn ran(&self) -> Vec<Step> {
        self.steps.iter().map(|s| s.step).collect()
    }
}

/// Point-in-time health snapshot emitted every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub tick: u64,
    pub counts_by_status: BTreeMap<String, i64>,
    pub total_products: i64,
    pub consecutive_failures: u32,
    pub breaker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<SupervisorReport>,
    pub generated_at: DateTime<Utc>,
}

/// Totals for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub cooldowns: u64,
}
