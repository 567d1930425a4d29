//! Mock trigger source for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::collaborators::{CollaboratorError, Trigger, TriggerSource};

/// Mock implementation of the TriggerSource trait.
#[derive(Debug, Default)]
pub struct MockTriggerSource {
    pending: Arc<RwLock<Vec<Trigger>>>,
    polls: Arc<RwLock<usize>>,
    next_error: Arc<RwLock<Option<String>>>,
}

impl MockTriggerSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a trigger for the next poll.
    pub async fn push(&self, trigger: Trigger) {
        self.pending.write().await.push(trigger);
    }

    pub async fn fail_next(&self, message: &str) {
        *self.next_error.write().await = Some(message.to_string());
    }

    pub async fn poll_count(&self) -> usize {
        *self.polls.read().await
    }
}

#[async_trait]
impl TriggerSource for MockTriggerSource {
    async fn poll(&self) -> Result<Vec<Trigger>, CollaboratorError> {
        *self.polls.write().await += 1;
        if let Some(message) = self.next_error.write().await.take() {
            return Err(CollaboratorError::failed(message));
        }
        Ok(std::mem::take(&mut *self.pending.write().await))
    }
}
