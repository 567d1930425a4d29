//! Types for the service supervisor.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A companion service the orchestrator keeps reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub port: u16,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub health_url: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Extra environment on top of the sanitized base environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A process started by a [`super::ProcessSupervisor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub name: String,
    pub pid: u32,
}

/// Result of supervising one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ServiceOutcome {
    /// Health check passed; nothing done.
    Healthy,
    /// Port owners were terminated and a new instance started.
    Restarted {
        killed: Vec<u32>,
        pid: u32,
        healthy_after_restart: bool,
    },
    /// The service could not be started.
    RestartFailed { error: String },
}

/// Outcome for one named service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub name: String,
    pub port: u16,
    pub outcome: ServiceOutcome,
}

/// Outcome of one supervisor pass over every declared service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorReport {
    pub services: Vec<ServiceReport>,
}

impl SupervisorReport {
    pub fn all_healthy(&self) -> bool {
        self.services
            .iter()
            .all(|s| s.outcome == ServiceOutcome::Healthy)
    }

    pub fn restarted(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|s| matches!(s.outcome, ServiceOutcome::Restarted { .. }))
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|s| matches!(s.outcome, ServiceOutcome::RestartFailed { .. }))
            .map(|s| s.name.as_str())
            .collect()
    }

    /// True when at least one restart was attempted and none of them succeeded.
    pub fn all_restarts_failed(&self) -> bool {
        !self.failed().is_empty() && self.restarted().is_empty()
    }
}

/// Errors that can occur while supervising processes.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The service declares an empty command.
    #[error("service {0} has an empty command")]
    EmptyCommand(String),

    /// Failed to spawn the service process.
    #[error("failed to start service {name}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to prepare the service log file.
    #[error("failed to prepare log file {path}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not determine which processes own a port.
    #[error("failed to look up owners of port {port}: {message}")]
    PortLookup { port: u16, message: String },

    /// Could not signal a process.
    #[error("failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },

    /// Could not build the health probe client.
    #[error("failed to build health probe: {0}")]
    Probe(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: Vec<ServiceOutcome>) -> SupervisorReport {
        SupervisorReport {
            services: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| ServiceReport {
                    name: format!("svc-{}", i),
                    port: 9000 + i as u16,
                    outcome,
                })
                .collect(),
        }
    }

    #[test]
    fn test_report_summaries() {
        let r = report(vec![
            ServiceOutcome::Healthy,
            ServiceOutcome::Restarted {
                killed: vec![10],
                pid: 11,
                healthy_after_restart: true,
            },
            ServiceOutcome::RestartFailed {
                error: "boom".into(),
            },
        ]);
        assert!(!r.all_healthy());
        assert_eq!(r.restarted(), vec!["svc-1"]);
        assert_eq!(r.failed(), vec!["svc-2"]);
        assert!(!r.all_restarts_failed());
        assert!(SupervisorReport::default().all_healthy());
        assert!(!SupervisorReport::default().all_restarts_failed());

        let down = report(vec![
            ServiceOutcome::Healthy,
            ServiceOutcome::RestartFailed {
                error: "no such file".into(),
            },
        ]);
        assert!(down.all_restarts_failed());
    }

    #[test]
    fn test_service_spec_deserialize() {
        let toml = r#"
            name = "checkout"
            port = 8090
            command = ["node", "server.js"]
            health_url = "http://127.0.0.1:8090/health"

            [env]
            NODE_ENV = "production"
        "#;
        let spec: ServiceSpec = toml::from_str(toml).unwrap();
        assert_eq!(spec.command, vec!["node", "server.js"]);
        assert_eq!(spec.env.get("NODE_ENV").map(String::as_str), Some("production"));
        assert!(spec.cwd.is_none());
    }
}
