//! Batch job models
//!
//! Defines submissions, probe configuration, jobs and the persisted job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::probe::ProbeType;
use super::task::EndpointTask;

/// Reserved job name marking a unified multi-endpoint API run
pub const UNIFIED_JOB_NAME: &str = "Unified API Test";

/// Lifecycle of a batch job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Forward-only transitions: pending -> running -> {completed, failed}.
    /// A job that cannot be scheduled may go straight from pending to failed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            JobStatus::Pending => "…",
            JobStatus::Running => "⟳",
            JobStatus::Completed => "✓",
            JobStatus::Failed => "✗",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What kind of targets a job covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "api")]
    Api,
    #[serde(rename = "api-batch")]
    ApiBatch,
    #[serde(rename = "ui")]
    Ui,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Api => "api",
            JobKind::ApiBatch => "api-batch",
            JobKind::Ui => "ui",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "api" => Some(JobKind::Api),
            "api-batch" | "batch" => Some(JobKind::ApiBatch),
            "ui" => Some(JobKind::Ui),
            _ => None,
        }
    }

    pub fn is_ui(&self) -> bool {
        matches!(self, JobKind::Ui)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enabled() -> bool {
    true
}

fn default_max_requests() -> usize {
    50
}

/// Probe toggles and limits shared by every task of a job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfig {
    #[serde(default = "enabled")]
    pub test_params: bool,
    #[serde(default = "enabled")]
    pub test_headers: bool,
    #[serde(default = "enabled")]
    pub test_response_time: bool,
    #[serde(default = "enabled")]
    pub test_error_cases: bool,

    /// Upper bound on HTTP requests a single endpoint task may issue
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    #[serde(default = "enabled")]
    pub test_links: bool,
    #[serde(default = "enabled")]
    pub test_forms: bool,
    #[serde(default = "enabled")]
    pub test_buttons: bool,
    #[serde(default = "enabled")]
    pub test_images: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            test_params: true,
            test_headers: true,
            test_response_time: true,
            test_error_cases: true,
            max_requests: default_max_requests(),
            test_links: true,
            test_forms: true,
            test_buttons: true,
            test_images: true,
        }
    }
}

impl TestConfig {
    /// Enabled probe types for a job kind, in report order
    pub fn enabled_probes(&self, kind: JobKind) -> Vec<ProbeType> {
        let toggles: [(ProbeType, bool); 4] = if kind.is_ui() {
            [
                (ProbeType::Links, self.test_links),
                (ProbeType::Forms, self.test_forms),
                (ProbeType::Buttons, self.test_buttons),
                (ProbeType::Images, self.test_images),
            ]
        } else {
            [
                (ProbeType::Params, self.test_params),
                (ProbeType::Headers, self.test_headers),
                (ProbeType::ResponseTime, self.test_response_time),
                (ProbeType::ErrorCases, self.test_error_cases),
            ]
        };

        toggles
            .into_iter()
            .filter(|(_, on)| *on)
            .map(|(probe, _)| probe)
            .collect()
    }

    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Turn a single probe type on or off
    pub fn set_probe(&mut self, probe: ProbeType, on: bool) {
        match probe {
            ProbeType::Params => self.test_params = on,
            ProbeType::Headers => self.test_headers = on,
            ProbeType::ResponseTime => self.test_response_time = on,
            ProbeType::ErrorCases => self.test_error_cases = on,
            ProbeType::Links => self.test_links = on,
            ProbeType::Forms => self.test_forms = on,
            ProbeType::Buttons => self.test_buttons = on,
            ProbeType::Images => self.test_images = on,
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// One target in a submission
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EndpointSpec {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            request_body: None,
            headers: BTreeMap::new(),
            name: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, "GET")
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.request_body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Upper-cased method, the grouping key used by reports
    pub fn normalized_method(&self) -> String {
        let method = self.method.trim();
        if method.is_empty() {
            default_method()
        } else {
            method.to_uppercase()
        }
    }
}

/// A request to run probes against a set of targets
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub endpoints: Vec<EndpointSpec>,
    #[serde(default)]
    pub config: TestConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: JobKind,
}

impl Submission {
    /// API submission; more than one endpoint makes it a batch
    pub fn api(endpoints: Vec<EndpointSpec>, config: TestConfig) -> Self {
        let kind = if endpoints.len() > 1 {
            JobKind::ApiBatch
        } else {
            JobKind::Api
        };
        Self {
            endpoints,
            config,
            name: None,
            kind,
        }
    }

    /// UI submission against a single page
    pub fn ui(url: impl Into<String>, config: TestConfig) -> Self {
        Self {
            endpoints: vec![EndpointSpec::get(url)],
            config,
            name: None,
            kind: JobKind::Ui,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn enabled_probes(&self) -> Vec<ProbeType> {
        self.config.enabled_probes(self.kind)
    }
}

/// Generate a sortable, unique job id
pub fn generate_id(prefix: &str) -> String {
    let suffix: u32 = rand::random();
    format!(
        "{}-{}-{:08x}",
        prefix,
        Utc::now().format("%Y%m%d%H%M%S"),
        suffix
    )
}

/// Job header: status and progress counters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: JobKind,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub total_endpoints: usize,
    pub completed_endpoints: usize,
    pub config: TestConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchJob {
    /// Name shown in listings, falling back to the job kind
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.as_str())
    }

    /// Unified or batch jobs are listed before ordinary ones
    pub fn is_batch(&self) -> bool {
        self.kind == JobKind::ApiBatch || self.name.as_deref() == Some(UNIFIED_JOB_NAME)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            total_endpoints: self.total_endpoints,
            completed_endpoints: self.completed_endpoints,
        }
    }

    /// Completion ratio in percent
    pub fn progress(&self) -> f64 {
        if self.total_endpoints == 0 {
            return 0.0;
        }
        self.completed_endpoints as f64 / self.total_endpoints as f64 * 100.0
    }
}

/// Immutable status view handed to pollers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub total_endpoints: usize,
    pub completed_endpoints: usize,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl fmt::Display for JobSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}/{}]",
            self.status.symbol(),
            self.status,
            self.completed_endpoints,
            self.total_endpoints
        )
    }
}

/// A job together with the tasks it owns. Stores replace records whole.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job: BatchJob,
    pub tasks: Vec<EndpointTask>,
}

impl JobRecord {
    /// Build a pending record with one task per endpoint
    pub fn from_submission(submission: &Submission) -> Self {
        let id = generate_id(submission.kind.as_str());
        let expected = submission.enabled_probes();

        let tasks = submission
            .endpoints
            .iter()
            .enumerate()
            .map(|(position, spec)| EndpointTask::new(&id, position, spec, expected.clone()))
            .collect::<Vec<_>>();

        let job = BatchJob {
            id,
            name: submission.name.clone(),
            kind: submission.kind,
            created_at: Utc::now(),
            completed_at: None,
            status: JobStatus::Pending,
            total_endpoints: tasks.len(),
            completed_endpoints: 0,
            config: submission.config.clone(),
            error: None,
        };

        Self { job, tasks }
    }

    pub fn id(&self) -> &str {
        &self.job.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_forward_only() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_config_wire_defaults() {
        let config: TestConfig = serde_json::from_str(r#"{"testHeaders": false}"#).unwrap();
        assert!(config.test_params);
        assert!(!config.test_headers);
        assert_eq!(config.max_requests, 50);
        assert_eq!(
            config.enabled_probes(JobKind::Api),
            vec![
                ProbeType::Params,
                ProbeType::ResponseTime,
                ProbeType::ErrorCases
            ]
        );
    }

    #[test]
    fn test_ui_probes_follow_ui_toggles() {
        let mut config = TestConfig::default();
        config.set_probe(ProbeType::Forms, false);
        assert_eq!(
            config.enabled_probes(JobKind::Ui),
            vec![ProbeType::Links, ProbeType::Buttons, ProbeType::Images]
        );
    }

    #[test]
    fn test_submission_kind() {
        let single = Submission::api(vec![EndpointSpec::get("/a")], TestConfig::default());
        assert_eq!(single.kind, JobKind::Api);

        let batch = Submission::api(
            vec![EndpointSpec::get("/a"), EndpointSpec::new("/b", "POST")],
            TestConfig::default(),
        );
        assert_eq!(batch.kind, JobKind::ApiBatch);
    }

    #[test]
    fn test_endpoint_spec_defaults() {
        let spec: EndpointSpec = serde_json::from_str(r#"{"url": "/a"}"#).unwrap();
        assert_eq!(spec.method, "GET");
        assert!(spec.headers.is_empty());
        assert_eq!(EndpointSpec::new("/a", " post ").normalized_method(), "POST");
    }

    #[test]
    fn test_record_from_submission() {
        let submission = Submission::api(
            vec![EndpointSpec::get("/a"), EndpointSpec::new("/b", "POST")],
            TestConfig::default(),
        )
        .with_name(UNIFIED_JOB_NAME);
        let record = JobRecord::from_submission(&submission);

        assert_eq!(record.job.status, JobStatus::Pending);
        assert_eq!(record.job.total_endpoints, 2);
        assert_eq!(record.job.completed_endpoints, 0);
        assert!(record.job.is_batch());
        assert!(record.id().starts_with("api-batch-"));
        assert_eq!(record.tasks[1].position, 1);
        assert_eq!(record.tasks[1].job_id, record.job.id);
        assert_eq!(record.tasks[0].expected_probes.len(), 4);
    }

    #[test]
    fn test_snapshot_wire_format() {
        let record = JobRecord::from_submission(&Submission::ui(
            "https://example.com",
            TestConfig::default(),
        ));
        let value = serde_json::to_value(record.job.snapshot()).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["totalEndpoints"], 1);
        assert_eq!(value["completedEndpoints"], 0);
    }
}
