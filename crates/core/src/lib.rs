pub mod collaborators;
pub mod config;
pub mod ledger;
pub mod orchestrator;
pub mod status;
pub mod supervisor;
pub mod testing;
pub mod worker;

pub use collaborators::{
    Auditor, CollaboratorError, Dispatcher, ErrorAnalysisHook, Generator, Publisher, TriggerSource,
};
pub use config::{
    load_config, load_config_from_str, load_config_or_default, validate_config, Config,
    ConfigError,
};
pub use ledger::{LedgerError, LedgerStore, Product, ProductStatus, SqliteLedger};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, TickReport};
pub use status::{RunState, StatusDocument, StatusReporter};
pub use supervisor::{ServiceSpec, ServiceSupervisor, SupervisorReport};
pub use worker::PromotionRetryWorker;
