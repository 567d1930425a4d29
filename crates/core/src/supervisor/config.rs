//! Service supervisor configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for keeping companion services alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Directory holding per-service log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Health probe timeout (seconds). Clamped to 2..=10.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Time given to a terminated port owner before it is killed (milliseconds).
    #[serde(default = "default_kill_wait")]
    pub kill_wait_ms: u64,

    /// Time given to a freshly started service before it is probed (milliseconds).
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,

    /// Rotate a service log once it reaches this size.
    #[serde(default = "default_max_log_bytes")]
    pub max_log_bytes: u64,

    /// Number of rotated log files kept per service.
    #[serde(default = "default_max_log_files")]
    pub max_log_files: u32,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_kill_wait() -> u64 {
    1000
}

fn default_startup_grace() -> u64 {
    3000
}

fn default_max_log_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_log_files() -> u32 {
    3
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            probe_timeout_secs: default_probe_timeout(),
            kill_wait_ms: default_kill_wait(),
            startup_grace_ms: default_startup_grace(),
            max_log_bytes: default_max_log_bytes(),
            max_log_files: default_max_log_files(),
        }
    }
}

impl SupervisorConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.clamp(2, 10))
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_millis(self.kill_wait_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}
