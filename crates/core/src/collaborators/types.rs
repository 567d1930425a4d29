//! Types exchanged with external collaborators.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Deployment result for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    /// Status reported by the deployment platform, `PUBLISHED` on success.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishResult {
    pub fn published(url: impl Into<String>) -> Self {
        Self {
            status: "PUBLISHED".to_string(),
            url: Some(url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: "FAILED".to_string(),
            url: None,
            error: Some(error.into()),
        }
    }

    pub fn is_published(&self) -> bool {
        self.status.eq_ignore_ascii_case("PUBLISHED")
    }
}

/// Results of a batch deployment keyed by product id.
pub type PublishResults = HashMap<String, PublishResult>;

/// Promotion result for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelResult {
    pub fn posted() -> Self {
        Self {
            ok: true,
            url: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            url: None,
            error: Some(error.into()),
        }
    }
}

/// Results of one dispatch keyed by channel name.
pub type DispatchResults = BTreeMap<String, ChannelResult>;

/// A fix proposed by an error analysis hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixProposal {
    /// 0.0 to 1.0.
    pub confidence: f32,
    #[serde(default)]
    pub fix: Option<Value>,
    #[serde(default)]
    pub summary: String,
}

impl FixProposal {
    pub fn none() -> Self {
        Self {
            confidence: 0.0,
            fix: None,
            summary: String::new(),
        }
    }
}

/// What an external trigger asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Send the product through deployment again.
    Redeliver,
    /// Regenerate the product from its topic.
    Recreate,
}

/// An externally requested action on one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub product_id: String,
    pub kind: TriggerKind,
    /// Topic to use when the product is not in the ledger.
    #[serde(default)]
    pub topic: Option<String>,
}

/// Outcome of an audit pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub checked: usize,
    pub repriced: usize,
    pub issues: Vec<String>,
}

/// Arguments for one generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub batch: u32,
    /// `None` lets the generator pick.
    pub topic: Option<String>,
}

impl GenerateRequest {
    pub fn new(batch: u32, topic: &str) -> Self {
        let topic = topic.trim();
        Self {
            batch,
            topic: (!topic.is_empty()).then(|| topic.to_string()),
        }
    }

    /// Command-line arguments appended to the generator program.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["--batch".to_string(), self.batch.to_string()];
        if let Some(topic) = &self.topic {
            args.push("--topic".to_string());
            args.push(topic.clone());
        }
        args
    }
}

/// How a generation run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOutcome {
    pub exit_code: Option<i32>,
    /// Last output lines, oldest first.
    pub tail: Vec<String>,
}

impl GenerateOutcome {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            tail: Vec::new(),
        }
    }

    pub fn failure(code: i32, tail: Vec<String>) -> Self {
        Self {
            exit_code: Some(code),
            tail,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn describe(&self) -> String {
        match self.exit_code {
            Some(code) => format!("generator exited with code {}", code),
            None => "generator terminated by signal".to_string(),
        }
    }
}
