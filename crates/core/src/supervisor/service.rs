//! Keeps the declared companion services reachable.

use std::sync::Arc;

use tracing::{info, warn};

use super::config::SupervisorConfig;
use super::health::HealthProbe;
use super::process::ProcessSupervisor;
use super::types::{ProcessHandle, ServiceOutcome, ServiceReport, ServiceSpec, SupervisorReport};

/// Probes every declared service and restarts the ones that are down.
pub struct ServiceSupervisor {
    services: Vec<ServiceSpec>,
    processes: Arc<dyn ProcessSupervisor>,
    probe: Arc<dyn HealthProbe>,
    config: SupervisorConfig,
    own_pid: u32,
}

impl ServiceSupervisor {
    pub fn new(
        services: Vec<ServiceSpec>,
        processes: Arc<dyn ProcessSupervisor>,
        probe: Arc<dyn HealthProbe>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            services,
            processes,
            probe,
            config,
            own_pid: std::process::id(),
        }
    }

    /// Override the pid treated as this process (never terminated).
    pub fn with_own_pid(mut self, pid: u32) -> Self {
        self.own_pid = pid;
        self
    }

    pub fn services(&self) -> &[ServiceSpec] {
        &self.services
    }

    /// Run one pass over every service.
    pub async fn ensure_all(&self) -> SupervisorReport {
        let mut report = SupervisorReport::default();
        for spec in &self.services {
            let outcome = self.ensure(spec).await;
            report.services.push(ServiceReport {
                name: spec.name.clone(),
                port: spec.port,
                outcome,
            });
        }
        report
    }

    /// Probe one service and restart it by port ownership if it is unhealthy.
    pub async fn ensure(&self, spec: &ServiceSpec) -> ServiceOutcome {
        if self.probe.check(&spec.health_url).await {
            return ServiceOutcome::Healthy;
        }

        warn!(service = %spec.name, port = spec.port, "Service unhealthy, restarting");

        let owners = match self.processes.port_owners(spec.port).await {
            Ok(owners) => owners,
            Err(e) => {
                warn!(service = %spec.name, error = %e, "Could not look up port owners");
                Vec::new()
            }
        };

        let mut killed = Vec::new();
        for pid in owners {
            if pid == self.own_pid {
                warn!(service = %spec.name, pid, "Port is owned by this process, not stopping it");
                continue;
            }
            let handle = ProcessHandle {
                name: spec.name.clone(),
                pid,
            };
            match self.processes.stop(&handle).await {
                Ok(()) => killed.push(pid),
                Err(e) => warn!(service = %spec.name, pid, error = %e, "Failed to stop port owner"),
            }
        }

        if !killed.is_empty() {
            tokio::time::sleep(self.config.kill_wait()).await;
        }

        // A new instance could not bind while anything still holds the port.
        if self.processes.is_listening(spec.port).await {
            warn!(service = %spec.name, port = spec.port, "Port still in use, not starting a new instance");
            return ServiceOutcome::RestartFailed {
                error: format!("port {} still in use after stopping its owners", spec.port),
            };
        }

        let handle = match self.processes.start(spec).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(service = %spec.name, error = %e, "Failed to restart service");
                return ServiceOutcome::RestartFailed {
                    error: e.to_string(),
                };
            }
        };

        tokio::time::sleep(self.config.startup_grace()).await;
        let healthy_after_restart = self.probe.check(&spec.health_url).await;
        if healthy_after_restart {
            info!(service = %spec.name, pid = handle.pid, "Service restarted");
        } else {
            warn!(service = %spec.name, pid = handle.pid, "Service restarted but not healthy yet");
        }

        ServiceOutcome::Restarted {
            killed,
            pid: handle.pid,
            healthy_after_restart,
        }
    }
}
