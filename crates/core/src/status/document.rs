//! The status document observed by external tooling.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse lifecycle state of the orchestrator process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    CoolingDown,
    Stopped,
    Crashed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::CoolingDown => "cooling_down",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Snapshot written to the status path.
///
/// Every field is optional so documents written by older or newer builds
/// still parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_failures: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker: Option<String>,
    /// Latest health report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
}

impl StatusDocument {
    /// Document for this process in the given state and phase.
    pub fn new(status: RunState, phase: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            phase: Some(phase.into()),
            pid: Some(std::process::id()),
            last_updated: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_last_log(mut self, line: impl Into<String>) -> Self {
        self.last_log = Some(line.into());
        self
    }
}
