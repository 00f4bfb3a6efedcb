//! Report aggregation
//!
//! Collapses a job record into a grouped report. Aggregation is a pure read of
//! the record: it never mutates stored state, and the result depends only on
//! task positions and probe type order, never on the order results arrived in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::models::{
    BatchJob, EndpointTask, JobKind, JobRecord, JobStatus, ProbeDetail, ProbeStatus, ProbeType,
    TaskStatus,
};

/// Fixed group order for well-known methods; anything else follows in first-seen order
pub const METHOD_ORDER: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// `round(100 * passed / total, 1)`, absent when nothing has finished
pub fn pass_rate(passed: usize, total: usize) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((1000.0 * passed as f64 / total as f64).round() / 10.0)
}

/// One probe outcome in the flat view
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRow {
    pub endpoint_task_id: String,
    pub endpoint: String,
    pub url: String,
    pub method: String,
    pub probe_type: ProbeType,
    pub status: ProbeStatus,
    /// Status of the owning task; non-terminal rows come from a job still in flight
    pub task_status: TaskStatus,
    pub response_time_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub response_size: Option<u64>,
    pub error: Option<String>,
}

/// Simplified element view used for UI jobs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiRow {
    pub probe_type: ProbeType,
    pub element: String,
    pub action: String,
    pub result: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    pub task_id: String,
    pub position: usize,
    pub url: String,
    pub method: String,
    pub name: Option<String>,
    pub status: TaskStatus,
    pub passed: usize,
    pub failed: usize,
    pub expected: usize,
}

impl EndpointSummary {
    fn from_task(task: &EndpointTask) -> Self {
        let passed = task.passed_count();
        Self {
            task_id: task.id.clone(),
            position: task.position,
            url: task.url.clone(),
            method: task.method.clone(),
            name: task.name.clone(),
            status: task.status,
            passed,
            failed: task.results.len() - passed,
            expected: task.expected_probes.len(),
        }
    }
}

/// Tasks sharing one HTTP method
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodGroup {
    pub method: String,
    pub endpoints: Vec<EndpointSummary>,
    pub passed: usize,
    pub total: usize,
    pub pass_rate: Option<f64>,
}

/// Tasks sharing one endpoint identity (url + method)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointGroup {
    pub url: String,
    pub method: String,
    pub tasks: Vec<EndpointSummary>,
    pub passed: usize,
    pub total: usize,
    pub pass_rate: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCounts {
    pub endpoints: usize,
    pub terminal_endpoints: usize,
    pub probes: usize,
    pub passed: usize,
    pub failed: usize,
    /// Enabled probes that have not reported yet
    pub outstanding: usize,
}

/// Derived, never persisted view of a job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub job_id: String,
    pub name: Option<String>,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// True once the job reached a terminal status
    pub complete: bool,
    pub all_tests: Vec<TestRow>,
    pub by_method: Vec<MethodGroup>,
    pub by_endpoint: Vec<EndpointGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ui_details: Vec<UiRow>,
    pub counts: ReportCounts,
    pub overall_pass_rate: Option<f64>,
}

impl Report {
    #[cfg(test)]
    pub fn method_group(&self, method: &str) -> Option<&MethodGroup> {
        self.by_method
            .iter()
            .find(|g| g.method.eq_ignore_ascii_case(method))
    }

    /// Label used in export names: the job name, or the first target
    pub fn subject(&self) -> &str {
        self.name
            .as_deref()
            .or_else(|| self.all_tests.first().map(|t| t.url.as_str()))
            .or_else(|| self.by_endpoint.first().map(|g| g.url.as_str()))
            .unwrap_or(&self.job_id)
    }
}

/// Build the report for one job
pub fn aggregate(record: &JobRecord) -> Report {
    let mut tasks: Vec<&EndpointTask> = record.tasks.iter().collect();
    tasks.sort_by_key(|t| t.position);

    let mut all_tests = Vec::new();
    let mut ui_details = Vec::new();
    let mut counts = ReportCounts {
        endpoints: tasks.len(),
        ..ReportCounts::default()
    };

    for task in &tasks {
        if task.status.is_terminal() {
            counts.terminal_endpoints += 1;
        }
        counts.outstanding += task.missing_probes().len();

        let mut results: Vec<_> = task.results.iter().collect();
        results.sort_by_key(|r| r.probe_type);

        for result in results {
            counts.probes += 1;
            match result.status {
                ProbeStatus::Passed => counts.passed += 1,
                ProbeStatus::Failed => counts.failed += 1,
            }

            let metrics = result.metrics();
            all_tests.push(TestRow {
                endpoint_task_id: task.id.clone(),
                endpoint: task.display_name().to_string(),
                url: task.url.clone(),
                method: task.method.clone(),
                probe_type: result.probe_type,
                status: result.status,
                task_status: task.status,
                response_time_ms: metrics.and_then(|m| m.response_time_ms),
                status_code: metrics.and_then(|m| m.status_code),
                response_size: metrics.and_then(|m| m.response_size),
                error: result.error.clone(),
            });

            if let ProbeDetail::Ui { checks } = &result.detail {
                ui_details.extend(checks.iter().map(|c| UiRow {
                    probe_type: result.probe_type,
                    element: c.element.clone(),
                    action: c.action.clone(),
                    result: match &c.error {
                        Some(e) => format!("{}: {}", c.status, e),
                        None => c.status.to_string(),
                    },
                }));
            }
        }
    }

    let job = &record.job;
    Report {
        job_id: job.id.clone(),
        name: job.name.clone(),
        kind: job.kind,
        status: job.status,
        created_at: job.created_at,
        completed_at: job.completed_at,
        error: job.error.clone(),
        complete: job.status.is_terminal(),
        by_method: group_by_method(&tasks),
        by_endpoint: group_by_endpoint(&tasks),
        all_tests,
        ui_details,
        overall_pass_rate: pass_rate(counts.passed, counts.probes),
        counts,
    }
}

fn group_by_method(tasks: &[&EndpointTask]) -> Vec<MethodGroup> {
    let mut seen: Vec<&str> = Vec::new();
    for task in tasks {
        if !seen.contains(&task.method.as_str()) {
            seen.push(&task.method);
        }
    }

    let mut ordered: Vec<&str> = Vec::with_capacity(seen.len());
    for method in METHOD_ORDER {
        if seen.contains(&method) {
            ordered.push(method);
        }
    }
    for method in &seen {
        if !METHOD_ORDER.iter().any(|known| known == method) {
            ordered.push(method);
        }
    }

    ordered
        .into_iter()
        .map(|method| {
            let endpoints: Vec<EndpointSummary> = tasks
                .iter()
                .filter(|t| t.method == method)
                .map(|t| EndpointSummary::from_task(t))
                .collect();
            let (passed, total) = tally(&endpoints);
            MethodGroup {
                method: method.to_string(),
                endpoints,
                passed,
                total,
                pass_rate: pass_rate(passed, total),
            }
        })
        .collect()
}

fn group_by_endpoint(tasks: &[&EndpointTask]) -> Vec<EndpointGroup> {
    let mut groups: Vec<EndpointGroup> = Vec::new();

    for task in tasks {
        let summary = EndpointSummary::from_task(task);
        match groups
            .iter_mut()
            .find(|g| g.url == task.url && g.method == task.method)
        {
            Some(group) => group.tasks.push(summary),
            None => groups.push(EndpointGroup {
                url: task.url.clone(),
                method: task.method.clone(),
                tasks: vec![summary],
                passed: 0,
                total: 0,
                pass_rate: None,
            }),
        }
    }

    for group in &mut groups {
        let (passed, total) = tally(&group.tasks);
        group.passed = passed;
        group.total = total;
        group.pass_rate = pass_rate(passed, total);
    }
    groups
}

fn tally(endpoints: &[EndpointSummary]) -> (usize, usize) {
    endpoints.iter().fold((0, 0), |(passed, total), e| {
        (passed + e.passed, total + e.passed + e.failed)
    })
}

/// Row used by job listings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub name: Option<String>,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_endpoints: usize,
    pub completed_endpoints: usize,
    pub pass_rate: Option<f64>,
    pub error: Option<String>,
}

impl JobSummary {
    pub fn from_record(record: &JobRecord) -> Self {
        let job = &record.job;
        let (passed, total) = record
            .tasks
            .iter()
            .fold((0, 0), |(p, t), task| {
                (p + task.passed_count(), t + task.results.len())
            });

        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            kind: job.kind,
            status: job.status,
            created_at: job.created_at,
            completed_at: job.completed_at,
            total_endpoints: job.total_endpoints,
            completed_endpoints: job.completed_endpoints,
            pass_rate: pass_rate(passed, total),
            error: job.error.clone(),
        }
    }
}

fn display_order(a: &BatchJob, b: &BatchJob) -> Ordering {
    b.is_batch()
        .cmp(&a.is_batch())
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Unified and batch jobs first, then newest first within each partition
pub fn sort_jobs_for_display(records: &mut [Arc<JobRecord>]) {
    records.sort_by(|a, b| display_order(&a.job, &b.job));
}

/// Listing rows in display order
pub fn summarize(records: &[Arc<JobRecord>]) -> Vec<JobSummary> {
    let mut records = records.to_vec();
    sort_jobs_for_display(&mut records);
    records.iter().map(|r| JobSummary::from_record(r)).collect()
}
