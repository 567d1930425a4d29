use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::orchestrator::OrchestratorConfig;
use crate::supervisor::{ServiceSpec, SupervisorConfig};
use crate::worker::WorkerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// Deployment adapter. Deployment retries are disabled without one.
    #[serde(default)]
    pub publisher: Option<CommandConfig>,
    /// Promotion adapter. Promotion steps are disabled without one.
    #[serde(default)]
    pub dispatcher: Option<CommandConfig>,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Companion services kept alive by the supervisor.
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Lifetime of download tokens issued when an order is paid.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

impl DatabaseConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_hours * 3600)
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("foundry.db")
}

fn default_token_ttl_hours() -> u64 {
    72
}

/// Status document configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_path")]
    pub path: PathBuf,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            path: default_status_path(),
        }
    }
}

fn default_status_path() -> PathBuf {
    PathBuf::from("status/orchestrator.json")
}

/// Generation child process configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_program")]
    pub program: String,
    /// Arguments placed before `--batch` and `--topic`.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            program: default_generator_program(),
            args: Vec::new(),
            cwd: None,
        }
    }
}

fn default_generator_program() -> String {
    "generate".to_string()
}

/// An external program exchanging JSON over stdin/stdout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Time allowed for one invocation (seconds).
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_command_timeout() -> u64 {
    300
}
