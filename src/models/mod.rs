//! Data models for batch test orchestration
//!
//! Jobs own their endpoint tasks, and tasks own their probe results.

mod job;
mod probe;
mod task;

pub use job::{
    generate_id, BatchJob, EndpointSpec, JobKind, JobRecord, JobSnapshot, JobStatus, Submission,
    TestConfig, UNIFIED_JOB_NAME,
};
pub use probe::{ProbeDetail, ProbeMetrics, ProbeResult, ProbeStatus, ProbeType, SubCheck, UiCheck};
pub use task::{EndpointTask, TaskStatus};
