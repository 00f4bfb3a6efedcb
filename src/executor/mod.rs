//! Job execution engine
//!
//! Runs endpoint tasks of a batch job concurrently under a bounded worker pool.

mod orchestrator;
mod worker;

pub use orchestrator::{Orchestrator, SubmitError, DEFAULT_MAX_CONCURRENT};
