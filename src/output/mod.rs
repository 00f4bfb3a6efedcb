//! Output formatting module
//!
//! Terminal rendering of job listings, progress and reports.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
