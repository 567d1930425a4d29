//! Testing utilities and mock implementations.
//!
//! Every collaborator trait has a mock here, so the control loop can be
//! driven end to end without external programs or services.
//!
//! # Example
//!
//! ```rust,ignore
//! use foundry_core::testing::{ManualClock, MockGenerator, MockPublisher};
//!
//! let generator = MockGenerator::new();
//! let publisher = MockPublisher::new();
//! let clock = ManualClock::new();
//!
//! // Configure mock responses
//! generator.fail_times(2, 1).await;
//! publisher.set_result("p1", PublishResult::failed("429")).await;
//!
//! // Hand them to Orchestrator::builder(...)
//! ```

mod manual_clock;
mod mock_auditor;
mod mock_dispatcher;
mod mock_error_analysis;
mod mock_generator;
mod mock_health_probe;
mod mock_process_supervisor;
mod mock_publisher;
mod mock_trigger_source;

pub use manual_clock::ManualClock;
pub use mock_auditor::MockAuditor;
pub use mock_dispatcher::{MockDispatcher, RecordedDispatch};
pub use mock_error_analysis::{MockErrorAnalysis, RecordedAnalysis};
pub use mock_generator::MockGenerator;
pub use mock_health_probe::MockHealthProbe;
pub use mock_process_supervisor::MockProcessSupervisor;
pub use mock_publisher::MockPublisher;
pub use mock_trigger_source::MockTriggerSource;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::collections::BTreeMap;

    use crate::ledger::{
        CreateProductRequest, LedgerError, LedgerStore, Product, ProductMetadata, ProductStatus,
    };
    use crate::supervisor::{ServiceSpec, SupervisorConfig};

    /// Insert a product with the given status.
    pub fn product(
        ledger: &dyn LedgerStore,
        id: &str,
        status: ProductStatus,
    ) -> Result<Product, LedgerError> {
        let mut metadata = ProductMetadata::new();
        if matches!(status, ProductStatus::Published | ProductStatus::Promoted) {
            metadata.deployment_url = Some(format!("https://deploy.test/{}", id));
        }
        ledger.create_product(
            CreateProductRequest::new(id, format!("topic for {}", id))
                .with_metadata(metadata)
                .with_status(status),
        )
    }

    /// Insert a failed product carrying `error` in its metadata.
    pub fn failed_product(
        ledger: &dyn LedgerStore,
        id: &str,
        status: ProductStatus,
        error: &str,
    ) -> Result<Product, LedgerError> {
        ledger.create_product(
            CreateProductRequest::new(id, format!("topic for {}", id))
                .with_metadata(ProductMetadata::failure("test", error))
                .with_status(status),
        )
    }

    /// A service on `port` with a local health URL.
    pub fn service(name: &str, port: u16) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            port,
            command: vec!["serve".to_string(), "--port".to_string(), port.to_string()],
            health_url: format!("http://127.0.0.1:{}/health", port),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Supervisor settings with no real waits.
    pub fn fast_supervisor_config() -> SupervisorConfig {
        SupervisorConfig {
            kill_wait_ms: 0,
            startup_grace_ms: 0,
            ..Default::default()
        }
    }
}
