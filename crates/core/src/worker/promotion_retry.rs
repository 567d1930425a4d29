//! Retries promotions for published products on its own cadence.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::WorkerConfig;
use crate::ledger::{LedgerError, LedgerStore, ProductStatus};
use crate::orchestrator::{Promoter, PromotionOutcome};

/// Lines kept in a worker's log buffer.
pub const LOG_CAPACITY: usize = 200;

/// Bounded in-memory log owned by one worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerLog {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl WorkerLog {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == LOG_CAPACITY {
                lines.pop_front();
            }
            lines.push_back(format!("{} {}", Utc::now().to_rfc3339(), line));
        }
    }

    /// Buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Counts from one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerPass {
    pub checked: usize,
    pub promoted: usize,
    pub partial: usize,
    pub failed: usize,
}

/// Background task promoting published products whose channels are not all posted.
pub struct PromotionRetryWorker {
    ledger: Arc<dyn LedgerStore>,
    promoter: Promoter,
    config: WorkerConfig,
    log: WorkerLog,
}

impl PromotionRetryWorker {
    pub fn new(ledger: Arc<dyn LedgerStore>, promoter: Promoter, config: WorkerConfig) -> Self {
        Self {
            ledger,
            promoter,
            config,
            log: WorkerLog::default(),
        }
    }

    /// Handle to this worker's log buffer.
    pub fn log(&self) -> WorkerLog {
        self.log.clone()
    }

    pub fn recent_log(&self) -> Vec<String> {
        self.log.lines()
    }

    fn record(&self, line: String) {
        info!(target: "worker", "{}", line);
        self.log.push(line);
    }

    /// Run one poll over the published products.
    pub async fn poll_once(&self) -> Result<WorkerPass, LedgerError> {
        let published = self
            .ledger
            .get_products_by_status(&ProductStatus::Published)?;
        let mut pass = WorkerPass::default();

        for product in published {
            pass.checked += 1;
            match self.promoter.promote(&product).await {
                Ok(PromotionOutcome::Promoted { posted }) => {
                    pass.promoted += 1;
                    self.record(format!("promoted {} on {:?}", product.id, posted));
                }
                Ok(PromotionOutcome::Partial { pending, .. }) => {
                    pass.partial += 1;
                    self.record(format!("{} still pending on {:?}", product.id, pending));
                }
                Ok(PromotionOutcome::Failed { error }) => {
                    pass.failed += 1;
                    self.record(format!("promotion of {} failed: {}", product.id, error));
                }
                Err(e) => {
                    pass.failed += 1;
                    self.record(format!("could not record promotion of {}: {}", product.id, e));
                }
            }
        }

        Ok(pass)
    }

    /// Spawn the polling loop. It stops when `shutdown_rx` fires.
    pub fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.poll_interval_secs,
                "Promotion retry worker started"
            );
            loop {
                match self.poll_once().await {
                    Ok(pass) if pass.checked > 0 => self.record(format!(
                        "poll: checked {}, promoted {}, partial {}, failed {}",
                        pass.checked, pass.promoted, pass.partial, pass.failed
                    )),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(target: "worker", error = %e, "Promotion retry poll failed");
                        self.log.push(format!("poll failed: {}", e));
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Promotion retry worker received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let log = WorkerLog::default();
        for i in 0..(LOG_CAPACITY + 5) {
            log.push(format!("line {}", i));
        }
        let lines = log.lines();
        assert_eq!(lines.len(), LOG_CAPACITY);
        assert!(lines[0].ends_with("line 5"));
        assert!(lines[LOG_CAPACITY - 1].ends_with(&format!("line {}", LOG_CAPACITY + 4)));
    }
}
