//! Background worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the promotion retry worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Run the worker alongside the control loop.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Time between polls (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    300
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
