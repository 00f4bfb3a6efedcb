//! Results storage and reporting module
//!
//! Provides job storage, report aggregation and export.

mod aggregate;
mod memory;
mod report;
mod storage;

pub use aggregate::{
    aggregate, pass_rate, sort_jobs_for_display, summarize, EndpointGroup, EndpointSummary,
    JobSummary, MethodGroup, Report, ReportCounts, TestRow, UiRow, METHOD_ORDER,
};
pub use memory::MemoryJobStore;
pub use report::{default_export_name, format_rate, ReportFormat, ReportGenerator, Sheet};
pub use storage::{FileJobStore, JobStore, StoreError};
