//! Mock generator for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::collaborators::{CollaboratorError, GenerateOutcome, GenerateRequest, Generator};
use crate::ledger::{product_id, CreateProductRequest, LedgerStore, ProductMetadata, ProductStatus};

/// Where generated products land.
struct Output {
    ledger: Arc<dyn LedgerStore>,
    status: ProductStatus,
    salt: String,
}

/// Mock implementation of the Generator trait.
///
/// Succeeds unless outcomes are queued. When attached to a ledger, each
/// successful run records `batch` products in the configured status.
pub struct MockGenerator {
    requests: Arc<RwLock<Vec<GenerateRequest>>>,
    outcomes: Arc<RwLock<VecDeque<GenerateOutcome>>>,
    next_error: Arc<RwLock<Option<String>>>,
    output: RwLock<Option<Output>>,
    created: AtomicUsize,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(RwLock::new(Vec::new())),
            outcomes: Arc::new(RwLock::new(VecDeque::new())),
            next_error: Arc::new(RwLock::new(None)),
            output: RwLock::new(None),
            created: AtomicUsize::new(0),
        }
    }

    /// Record products in `ledger` with `status` on every successful run.
    pub async fn write_to(&self, ledger: Arc<dyn LedgerStore>, status: ProductStatus, salt: &str) {
        *self.output.write().await = Some(Output {
            ledger,
            status,
            salt: salt.to_string(),
        });
    }

    /// Queue the outcome of an upcoming run. Queued outcomes are used in order.
    pub async fn push_outcome(&self, outcome: GenerateOutcome) {
        self.outcomes.write().await.push_back(outcome);
    }

    /// Queue `count` failing runs with the given exit code.
    pub async fn fail_times(&self, count: usize, code: i32) {
        let mut outcomes = self.outcomes.write().await;
        for _ in 0..count {
            outcomes.push_back(GenerateOutcome::failure(
                code,
                vec![format!("mock generator failed with {}", code)],
            ));
        }
    }

    /// Configure the next call to fail before running.
    pub async fn fail_next(&self, message: &str) {
        *self.next_error.write().await = Some(message.to_string());
    }

    pub async fn recorded_requests(&self) -> Vec<GenerateRequest> {
        self.requests.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.read().await.len()
    }

    async fn record_products(&self, request: &GenerateRequest) -> Result<(), CollaboratorError> {
        let output = self.output.read().await;
        let Some(output) = output.as_ref() else {
            return Ok(());
        };
        for _ in 0..request.batch {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            let topic = match &request.topic {
                Some(topic) if request.batch == 1 => topic.clone(),
                Some(topic) => format!("{} {}", topic, n),
                None => format!("generated topic {}", n),
            };
            let id = product_id(&topic, &output.salt);
            let mut metadata = ProductMetadata::new();
            if matches!(output.status, ProductStatus::Published | ProductStatus::Promoted) {
                metadata.deployment_url = Some(format!("https://deploy.test/{}", id));
            }
            output
                .ledger
                .create_product(
                    CreateProductRequest::new(&id, &topic)
                        .with_metadata(metadata)
                        .with_status(output.status.clone()),
                )
                .map_err(|e| CollaboratorError::failed(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateOutcome, CollaboratorError> {
        self.requests.write().await.push(request.clone());

        if let Some(message) = self.next_error.write().await.take() {
            return Err(CollaboratorError::failed(message));
        }

        let outcome = self
            .outcomes
            .write()
            .await
            .pop_front()
            .unwrap_or_else(GenerateOutcome::success);
        if outcome.succeeded() {
            self.record_products(request).await?;
        }
        Ok(outcome)
    }
}
