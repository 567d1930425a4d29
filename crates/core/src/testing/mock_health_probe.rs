//! Mock health probe for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::supervisor::HealthProbe;

/// Mock implementation of the HealthProbe trait.
///
/// Scripted answers for a URL are consumed first; afterwards the URL's
/// fixed answer applies, falling back to the default (healthy).
#[derive(Debug)]
pub struct MockHealthProbe {
    scripted: Arc<RwLock<HashMap<String, VecDeque<bool>>>>,
    fixed: Arc<RwLock<HashMap<String, bool>>>,
    default_healthy: Arc<RwLock<bool>>,
    checks: Arc<RwLock<Vec<String>>>,
}

impl Default for MockHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHealthProbe {
    pub fn new() -> Self {
        Self {
            scripted: Arc::new(RwLock::new(HashMap::new())),
            fixed: Arc::new(RwLock::new(HashMap::new())),
            default_healthy: Arc::new(RwLock::new(true)),
            checks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set_healthy(&self, url: &str, healthy: bool) {
        self.fixed.write().await.insert(url.to_string(), healthy);
    }

    pub async fn set_default(&self, healthy: bool) {
        *self.default_healthy.write().await = healthy;
    }

    /// Answer the next checks of `url` with `answers`, in order.
    pub async fn script(&self, url: &str, answers: Vec<bool>) {
        self.scripted
            .write()
            .await
            .entry(url.to_string())
            .or_default()
            .extend(answers);
    }

    pub async fn recorded_checks(&self) -> Vec<String> {
        self.checks.read().await.clone()
    }
}

#[async_trait]
impl HealthProbe for MockHealthProbe {
    async fn check(&self, url: &str) -> bool {
        self.checks.write().await.push(url.to_string());
        if let Some(answer) = self
            .scripted
            .write()
            .await
            .get_mut(url)
            .and_then(VecDeque::pop_front)
        {
            return answer;
        }
        match self.fixed.read().await.get(url) {
            Some(healthy) => *healthy,
            None => *self.default_healthy.read().await,
        }
    }
}
