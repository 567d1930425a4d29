//! Mock dispatcher for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::collaborators::{ChannelResult, CollaboratorError, DispatchResults, Dispatcher};

/// A recorded dispatch for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDispatch {
    pub product_id: String,
    pub channels: Option<Vec<String>>,
}

/// Mock implementation of the Dispatcher trait.
///
/// Every requested channel succeeds unless marked failing. A dispatch
/// without explicit channels answers for a single `default` channel.
#[derive(Debug, Default)]
pub struct MockDispatcher {
    calls: Arc<RwLock<Vec<RecordedDispatch>>>,
    failing_channels: Arc<RwLock<HashSet<String>>>,
    next_error: Arc<RwLock<Option<String>>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded dispatches.
    pub async fn recorded_calls(&self) -> Vec<RecordedDispatch> {
        self.calls.read().await.clone()
    }

    /// Dispatches recorded for one product.
    pub async fn calls_for(&self, product_id: &str) -> Vec<RecordedDispatch> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.product_id == product_id)
            .cloned()
            .collect()
    }

    /// Report `channel` as not posted until cleared.
    pub async fn fail_channel(&self, channel: &str) {
        self.failing_channels.write().await.insert(channel.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failing_channels.write().await.clear();
    }

    /// Configure the next dispatch to fail as a whole.
    pub async fn fail_next(&self, message: &str) {
        *self.next_error.write().await = Some(message.to_string());
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn dispatch(
        &self,
        product_id: &str,
        channels: Option<&[String]>,
    ) -> Result<DispatchResults, CollaboratorError> {
        self.calls.write().await.push(RecordedDispatch {
            product_id: product_id.to_string(),
            channels: channels.map(<[String]>::to_vec),
        });

        if let Some(message) = self.next_error.write().await.take() {
            return Err(CollaboratorError::failed(message));
        }

        let failing = self.failing_channels.read().await;
        let requested = channels
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| vec!["default".to_string()]);
        Ok(requested
            .into_iter()
            .map(|channel| {
                let result = if failing.contains(&channel) {
                    ChannelResult::failed("mock channel failure")
                } else {
                    ChannelResult::posted()
                };
                (channel, result)
            })
            .collect())
    }
}
