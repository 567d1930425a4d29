//! Mock publisher for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::collaborators::{CollaboratorError, PublishResult, PublishResults, Publisher};

/// Mock implementation of the Publisher trait.
///
/// Ids without a configured result are published at
/// `https://deploy.test/<id>`.
///
/// # Example
///
/// ```rust,ignore
/// use foundry_core::testing::MockPublisher;
///
/// let publisher = MockPublisher::new();
/// publisher.set_result("p1", PublishResult::failed("429 rate limited")).await;
///
/// let results = publisher.publish_batch(&["p1".into()]).await?;
/// assert_eq!(publisher.recorded_calls().await.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockPublisher {
    /// Recorded batches.
    calls: Arc<RwLock<Vec<Vec<String>>>>,
    /// Configured per-id results.
    results: Arc<RwLock<HashMap<String, PublishResult>>>,
    /// Ids the publisher leaves out of its answer.
    omitted: Arc<RwLock<Vec<String>>>,
    /// If set, the next call fails with this message.
    next_error: Arc<RwLock<Option<String>>>,
    /// If set, every call fails with this message.
    always_error: Arc<RwLock<Option<String>>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded batches.
    pub async fn recorded_calls(&self) -> Vec<Vec<String>> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Answer `id` with `result` from now on.
    pub async fn set_result(&self, id: &str, result: PublishResult) {
        self.results.write().await.insert(id.to_string(), result);
    }

    /// Leave `id` out of every answer.
    pub async fn omit(&self, id: &str) {
        self.omitted.write().await.push(id.to_string());
    }

    /// Configure the next call to fail.
    pub async fn fail_next(&self, message: &str) {
        *self.next_error.write().await = Some(message.to_string());
    }

    /// Configure every call to fail until cleared.
    pub async fn fail_always(&self, message: Option<&str>) {
        *self.always_error.write().await = message.map(str::to_string);
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish_batch(&self, ids: &[String]) -> Result<PublishResults, CollaboratorError> {
        self.calls.write().await.push(ids.to_vec());

        if let Some(message) = self.next_error.write().await.take() {
            return Err(CollaboratorError::failed(message));
        }
        if let Some(message) = self.always_error.read().await.clone() {
            return Err(CollaboratorError::failed(message));
        }

        let results = self.results.read().await;
        let omitted = self.omitted.read().await;
        Ok(ids
            .iter()
            .filter(|id| !omitted.contains(id))
            .map(|id| {
                let result = results
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| PublishResult::published(format!("https://deploy.test/{}", id)));
                (id.clone(), result)
            })
            .collect())
    }
}
