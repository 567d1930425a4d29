//! Mock process supervisor for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::supervisor::{ProcessHandle, ProcessSupervisor, ServiceSpec, SupervisorError};

/// Mock implementation of the ProcessSupervisor trait.
///
/// Tracks port ownership in memory: starting a service makes its new pid
/// the port owner, stopping a pid releases every port it held.
#[derive(Debug)]
pub struct MockProcessSupervisor {
    owners: Arc<RwLock<HashMap<u16, Vec<u32>>>>,
    started: Arc<RwLock<Vec<ProcessHandle>>>,
    stopped: Arc<RwLock<Vec<u32>>>,
    start_error: Arc<RwLock<Option<String>>>,
    failing_services: Arc<RwLock<HashSet<String>>>,
    unstoppable: Arc<RwLock<HashSet<u32>>>,
    next_pid: Arc<RwLock<u32>>,
}

impl Default for MockProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessSupervisor {
    pub fn new() -> Self {
        Self {
            owners: Arc::new(RwLock::new(HashMap::new())),
            started: Arc::new(RwLock::new(Vec::new())),
            stopped: Arc::new(RwLock::new(Vec::new())),
            start_error: Arc::new(RwLock::new(None)),
            failing_services: Arc::new(RwLock::new(HashSet::new())),
            unstoppable: Arc::new(RwLock::new(HashSet::new())),
            next_pid: Arc::new(RwLock::new(10_000)),
        }
    }

    /// Pretend `pids` are listening on `port`.
    pub async fn set_port_owners(&self, port: u16, pids: Vec<u32>) {
        self.owners.write().await.insert(port, pids);
    }

    pub async fn owners(&self, port: u16) -> Vec<u32> {
        self.owners
            .read()
            .await
            .get(&port)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every start fail with `message` until cleared.
    pub async fn fail_starts(&self, message: Option<&str>) {
        *self.start_error.write().await = message.map(str::to_string);
    }

    /// Make starts of the named service fail.
    pub async fn fail_start_for(&self, name: &str) {
        self.failing_services.write().await.insert(name.to_string());
    }

    /// Make stopping `pid` fail; it keeps its ports.
    pub async fn fail_stop_for(&self, pid: u32) {
        self.unstoppable.write().await.insert(pid);
    }

    pub async fn recorded_starts(&self) -> Vec<ProcessHandle> {
        self.started.read().await.clone()
    }

    pub async fn recorded_stops(&self) -> Vec<u32> {
        self.stopped.read().await.clone()
    }
}

#[async_trait]
impl ProcessSupervisor for MockProcessSupervisor {
    async fn start(&self, spec: &ServiceSpec) -> Result<ProcessHandle, SupervisorError> {
        if spec.command.is_empty() {
            return Err(SupervisorError::EmptyCommand(spec.name.clone()));
        }
        let error = match self.start_error.read().await.clone() {
            Some(message) => Some(message),
            None if self.failing_services.read().await.contains(&spec.name) => {
                Some(format!("{} refused to start", spec.name))
            }
            None => None,
        };
        if let Some(message) = error {
            return Err(SupervisorError::SpawnFailed {
                name: spec.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, message),
            });
        }

        let pid = {
            let mut next = self.next_pid.write().await;
            *next += 1;
            *next
        };
        let handle = ProcessHandle {
            name: spec.name.clone(),
            pid,
        };
        self.owners.write().await.insert(spec.port, vec![pid]);
        self.started.write().await.push(handle.clone());
        Ok(handle)
    }

    async fn stop(&self, handle: &ProcessHandle) -> Result<(), SupervisorError> {
        self.stopped.write().await.push(handle.pid);
        if self.unstoppable.read().await.contains(&handle.pid) {
            return Err(SupervisorError::Signal {
                pid: handle.pid,
                message: "EPERM: Operation not permitted".to_string(),
            });
        }
        for pids in self.owners.write().await.values_mut() {
            pids.retain(|pid| *pid != handle.pid);
        }
        Ok(())
    }

    async fn is_listening(&self, port: u16) -> bool {
        !self.owners(port).await.is_empty()
    }

    async fn port_owners(&self, port: u16) -> Result<Vec<u32>, SupervisorError> {
        Ok(self.owners(port).await)
    }
}
