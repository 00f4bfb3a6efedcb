//! Endpoint task model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::job::EndpointSpec;
use super::probe::{ProbeResult, ProbeStatus, ProbeType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Passed | TaskStatus::Failed)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "…",
            TaskStatus::Running => "⟳",
            TaskStatus::Passed => "✓",
            TaskStatus::Failed => "✗",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Passed => write!(f, "passed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The probes run against one target within a job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointTask {
    pub id: String,
    pub job_id: String,
    /// Insertion order inside the job
    pub position: usize,
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub status: TaskStatus,
    pub expected_probes: Vec<ProbeType>,
    #[serde(default)]
    pub results: Vec<ProbeResult>,
}

impl EndpointTask {
    pub fn new(
        job_id: &str,
        position: usize,
        spec: &EndpointSpec,
        expected_probes: Vec<ProbeType>,
    ) -> Self {
        Self {
            id: format!("{job_id}-{position}"),
            job_id: job_id.to_string(),
            position,
            url: spec.url.clone(),
            method: spec.normalized_method(),
            name: spec.name.clone(),
            request_body: spec.request_body.clone(),
            headers: spec.headers.clone(),
            status: TaskStatus::Pending,
            expected_probes,
            results: Vec::new(),
        }
    }

    /// Rebuild the submission view of this task, handed to probe executors
    pub fn spec(&self) -> EndpointSpec {
        EndpointSpec {
            url: self.url.clone(),
            method: self.method.clone(),
            request_body: self.request_body.clone(),
            headers: self.headers.clone(),
            name: self.name.clone(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    pub fn mark_running(&mut self) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Running;
        }
    }

    /// Store a probe result, replacing any earlier result of the same type,
    /// then re-derive the task status.
    pub fn record(&mut self, result: ProbeResult) {
        match self
            .results
            .iter_mut()
            .find(|r| r.probe_type == result.probe_type)
        {
            Some(existing) => *existing = result,
            None => self.results.push(result),
        }
        self.results.sort_by_key(|r| r.probe_type);
        self.status = self.derive_status();
    }

    /// failed if any probe failed; passed once every expected probe passed;
    /// otherwise still in progress.
    pub fn derive_status(&self) -> TaskStatus {
        if self
            .results
            .iter()
            .any(|r| r.status == ProbeStatus::Failed)
        {
            return TaskStatus::Failed;
        }

        let all_reported = self
            .expected_probes
            .iter()
            .all(|p| self.results.iter().any(|r| r.probe_type == *p));
        if all_reported {
            return TaskStatus::Passed;
        }

        if self.results.is_empty() && self.status == TaskStatus::Pending {
            TaskStatus::Pending
        } else {
            TaskStatus::Running
        }
    }

    /// Expected probe types that have no result yet
    pub fn missing_probes(&self) -> Vec<ProbeType> {
        self.expected_probes
            .iter()
            .copied()
            .filter(|p| !self.results.iter().any(|r| r.probe_type == *p))
            .collect()
    }

    pub fn passed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == ProbeStatus::Passed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::probe::{ProbeMetrics, SubCheck};

    fn task() -> EndpointTask {
        EndpointTask::new(
            "job-1",
            0,
            &EndpointSpec::new("/a", "get"),
            vec![ProbeType::Params, ProbeType::Headers],
        )
    }

    fn passed(probe: ProbeType) -> ProbeResult {
        ProbeResult::from_sub_checks(
            "job-1-0",
            probe,
            ProbeMetrics::default(),
            vec![SubCheck::passed("ok")],
        )
    }

    #[test]
    fn test_new_task() {
        let task = task();
        assert_eq!(task.id, "job-1-0");
        assert_eq!(task.method, "GET");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.derive_status(), TaskStatus::Pending);
    }

    #[test]
    fn test_status_runs_until_all_probes_report() {
        let mut task = task();
        task.mark_running();
        task.record(passed(ProbeType::Headers));
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.missing_probes(), vec![ProbeType::Params]);

        task.record(passed(ProbeType::Params));
        assert_eq!(task.status, TaskStatus::Passed);
        assert_eq!(
            task.results.iter().map(|r| r.probe_type).collect::<Vec<_>>(),
            vec![ProbeType::Params, ProbeType::Headers]
        );
    }

    #[test]
    fn test_any_failure_fails_task() {
        let mut task = task();
        task.record(ProbeResult::from_sub_checks(
            "job-1-0",
            ProbeType::Params,
            ProbeMetrics::default(),
            vec![],
        ));
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn test_record_replaces_same_probe_type() {
        let mut task = task();
        task.record(ProbeResult::fault("job-1-0", ProbeType::Params, "boom"));
        task.record(passed(ProbeType::Params));
        assert_eq!(task.results.len(), 1);
        assert_eq!(task.status, TaskStatus::Running);
    }
}
