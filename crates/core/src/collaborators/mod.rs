//! External collaborators invoked by the orchestrator.
//!
//! Deployment, promotion, generation, error analysis, triggers and audits
//! live outside this crate. Each is reached through a narrow trait so the
//! control loop can be driven by mocks in tests and by process adapters in
//! production.

mod builtin;
mod command;
mod error;
mod generator;
mod inbox;
mod traits;
mod types;

pub use builtin::{ConsistencyAuditor, NoopErrorAnalysis};
pub use command::{CommandDispatcher, CommandPublisher};
pub use error::CollaboratorError;
pub use generator::{ProcessGenerator, TAIL_LINES};
pub use inbox::InboxTriggerSource;
pub use traits::{Auditor, Dispatcher, ErrorAnalysisHook, Generator, Publisher, TriggerSource};
pub use types::{
    AuditSummary, ChannelResult, DispatchResults, FixProposal, GenerateOutcome, GenerateRequest,
    PublishResult, PublishResults, Trigger, TriggerKind,
};
