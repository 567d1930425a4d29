//! Status reporter.
//!
//! Publishes one JSON document describing the orchestrator's externally
//! observable state. Writes go to a temporary file beside the destination
//! and are renamed into place.

mod document;
mod reporter;

pub use document::{RunState, StatusDocument};
pub use reporter::{read_status, RetryPolicy, StatusReporter};
