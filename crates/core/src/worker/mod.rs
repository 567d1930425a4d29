//! Background workers running beside the control loop.
//!
//! Workers share only the ledger with the loop and keep their own log
//! buffer.

mod config;
mod promotion_retry;

pub use config::WorkerConfig;
pub use promotion_retry::{PromotionRetryWorker, WorkerLog, WorkerPass, LOG_CAPACITY};
