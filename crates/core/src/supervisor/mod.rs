//! Service supervisor.
//!
//! Keeps a fixed set of companion HTTP services alive. Each pass probes a
//! service's health URL and, when it fails, terminates whatever owns the
//! service port and starts a fresh detached instance.

mod config;
mod health;
mod process;
mod service;
mod types;

pub use config::SupervisorConfig;
pub use health::{HealthProbe, HttpHealthProbe};
pub use process::{rotate_log, OsProcessSupervisor, ProcessSupervisor, ENV_ALLOWLIST};
pub use service::ServiceSupervisor;
pub use types::{
    ProcessHandle, ServiceOutcome, ServiceReport, ServiceSpec, SupervisorError, SupervisorReport,
};
