//! Orchestrator control loop.
//!
//! Drives products from `WAITING_FOR_DEPLOYMENT` through `PUBLISHED` to
//! `PROMOTED`, keeps companion services alive, and pauses behind a circuit
//! breaker when ticks keep failing.

mod breaker;
mod clock;
mod config;
mod promotion;
mod runner;
mod types;

pub use breaker::{BreakerState, CircuitBreaker};
pub use clock::{Clock, SystemClock};
pub use config::{OrchestratorConfig, MIN_INTERVAL_SECS};
pub use promotion::{Promoter, PromotionOutcome};
pub use runner::{Orchestrator, OrchestratorBuilder};
pub use types::{
    HealthReport, OrchestratorError, RunSummary, Step, StepOutcome, StepRecord, TickReport,
};
