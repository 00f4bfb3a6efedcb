//! Probe result models
//!
//! Defines probe types, probe outcomes and the per-category result detail.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of check run against a single target.
///
/// Declaration order is the stable report order: results inside a task are
/// always listed in this order regardless of completion order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeType {
    // API probes
    Params,
    Headers,
    ResponseTime,
    ErrorCases,

    // UI probes
    Links,
    Forms,
    Buttons,
    Images,
}

impl ProbeType {
    /// Human readable name
    pub fn name(&self) -> &'static str {
        match self {
            ProbeType::Params => "Query Parameters",
            ProbeType::Headers => "Headers",
            ProbeType::ResponseTime => "Response Time",
            ProbeType::ErrorCases => "Error Cases",
            ProbeType::Links => "Links",
            ProbeType::Forms => "Forms",
            ProbeType::Buttons => "Buttons",
            ProbeType::Images => "Images",
        }
    }

    /// Wire identifier, identical to the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Params => "params",
            ProbeType::Headers => "headers",
            ProbeType::ResponseTime => "responseTime",
            ProbeType::ErrorCases => "errorCases",
            ProbeType::Links => "links",
            ProbeType::Forms => "forms",
            ProbeType::Buttons => "buttons",
            ProbeType::Images => "images",
        }
    }

    pub fn is_ui(&self) -> bool {
        matches!(
            self,
            ProbeType::Links | ProbeType::Forms | ProbeType::Buttons | ProbeType::Images
        )
    }

    pub fn api() -> Vec<ProbeType> {
        vec![
            ProbeType::Params,
            ProbeType::Headers,
            ProbeType::ResponseTime,
            ProbeType::ErrorCases,
        ]
    }

    pub fn ui() -> Vec<ProbeType> {
        vec![
            ProbeType::Links,
            ProbeType::Forms,
            ProbeType::Buttons,
            ProbeType::Images,
        ]
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "params" | "parameters" => Some(ProbeType::Params),
            "headers" => Some(ProbeType::Headers),
            "responsetime" | "response-time" | "response_time" => Some(ProbeType::ResponseTime),
            "errorcases" | "error-cases" | "error_cases" => Some(ProbeType::ErrorCases),
            "links" => Some(ProbeType::Links),
            "forms" => Some(ProbeType::Forms),
            "buttons" => Some(ProbeType::Buttons),
            "images" => Some(ProbeType::Images),
            _ => None,
        }
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal outcome of one probe or sub-check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Passed,
    Failed,
}

impl ProbeStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            ProbeStatus::Passed => "✓",
            ProbeStatus::Failed => "✗",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeStatus::Passed)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Passed => write!(f, "passed"),
            ProbeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Measurements captured by an API probe. Every field is optional because a
/// probe that never reached the server has nothing to report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// One request issued while running an API probe
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubCheck {
    pub label: String,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubCheck {
    pub fn passed(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: ProbeStatus::Passed,
            status_code: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn failed(label: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: ProbeStatus::Failed,
            status_code: None,
            duration_ms: None,
            error: Some(error.into()),
        }
    }

    pub fn with_response(mut self, status_code: u16, duration_ms: f64) -> Self {
        self.status_code = Some(status_code);
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// One page element inspected by a UI probe
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiCheck {
    pub element: String,
    pub element_type: String,
    pub action: String,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UiCheck {
    pub fn new(
        element: impl Into<String>,
        element_type: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            element: element.into(),
            element_type: element_type.into(),
            action: action.into(),
            status: ProbeStatus::Passed,
            error: None,
        }
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = ProbeStatus::Failed;
        self.error = Some(error.into());
        self
    }
}

/// Category-specific payload of a probe result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum ProbeDetail {
    #[serde(rename_all = "camelCase")]
    Api {
        metrics: ProbeMetrics,
        sub_checks: Vec<SubCheck>,
    },
    #[serde(rename_all = "camelCase")]
    Ui { checks: Vec<UiCheck> },
}

impl ProbeDetail {
    pub fn empty_for(probe_type: ProbeType) -> Self {
        if probe_type.is_ui() {
            ProbeDetail::Ui { checks: Vec::new() }
        } else {
            ProbeDetail::Api {
                metrics: ProbeMetrics::default(),
                sub_checks: Vec::new(),
            }
        }
    }
}

/// Exactly one of these exists per enabled probe type per endpoint task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub endpoint_task_id: String,
    pub probe_type: ProbeType,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub detail: ProbeDetail,
}

impl ProbeResult {
    /// Collapse API sub-checks into a single outcome: failed if any sub-check
    /// failed, with every failing description joined into `error`.
    pub fn from_sub_checks(
        endpoint_task_id: impl Into<String>,
        probe_type: ProbeType,
        metrics: ProbeMetrics,
        sub_checks: Vec<SubCheck>,
    ) -> Self {
        let failures: Vec<String> = sub_checks
            .iter()
            .filter(|c| c.status == ProbeStatus::Failed)
            .map(|c| match &c.error {
                Some(e) => format!("{}: {}", c.label, e),
                None => c.label.clone(),
            })
            .collect();

        let (status, error) = if sub_checks.is_empty() {
            (
                ProbeStatus::Failed,
                Some("no sub-checks were executed".to_string()),
            )
        } else if failures.is_empty() {
            (ProbeStatus::Passed, None)
        } else {
            (ProbeStatus::Failed, Some(failures.join("; ")))
        };

        Self {
            endpoint_task_id: endpoint_task_id.into(),
            probe_type,
            status,
            error,
            detail: ProbeDetail::Api {
                metrics,
                sub_checks,
            },
        }
    }

    /// Collapse UI element checks. A page without matching elements passes.
    pub fn from_ui_checks(
        endpoint_task_id: impl Into<String>,
        probe_type: ProbeType,
        checks: Vec<UiCheck>,
    ) -> Self {
        let failed = checks
            .iter()
            .filter(|c| c.status == ProbeStatus::Failed)
            .count();
        let (status, error) = if failed == 0 {
            (ProbeStatus::Passed, None)
        } else {
            (
                ProbeStatus::Failed,
                Some(format!("{failed} of {} elements failed", checks.len())),
            )
        };

        Self {
            endpoint_task_id: endpoint_task_id.into(),
            probe_type,
            status,
            error,
            detail: ProbeDetail::Ui { checks },
        }
    }

    /// A probe that could not run at all
    pub fn fault(
        endpoint_task_id: impl Into<String>,
        probe_type: ProbeType,
        error: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_task_id: endpoint_task_id.into(),
            probe_type,
            status: ProbeStatus::Failed,
            error: Some(error.into()),
            detail: ProbeDetail::empty_for(probe_type),
        }
    }

    pub fn cancelled(endpoint_task_id: impl Into<String>, probe_type: ProbeType) -> Self {
        Self::fault(endpoint_task_id, probe_type, "cancelled before completion")
    }

    pub fn metrics(&self) -> Option<&ProbeMetrics> {
        match &self.detail {
            ProbeDetail::Api { metrics, .. } => Some(metrics),
            ProbeDetail::Ui { .. } => None,
        }
    }

    pub fn response_time_ms(&self) -> Option<f64> {
        self.metrics().and_then(|m| m.response_time_ms)
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.symbol(), self.probe_type)?;
        if let Some(ms) = self.response_time_ms() {
            write!(f, " [{ms:.1}ms]")?;
        }
        if let Some(err) = &self.error {
            write!(f, " - {err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_type_order_is_declaration_order() {
        let mut shuffled = vec![
            ProbeType::ErrorCases,
            ProbeType::Params,
            ProbeType::ResponseTime,
            ProbeType::Headers,
        ];
        shuffled.sort();
        assert_eq!(shuffled, ProbeType::api());
    }

    #[test]
    fn test_probe_type_wire_names() {
        let json = serde_json::to_string(&ProbeType::ResponseTime).unwrap();
        assert_eq!(json, "\"responseTime\"");
        for probe in ProbeType::api().into_iter().chain(ProbeType::ui()) {
            assert_eq!(ProbeType::from_str(probe.as_str()), Some(probe));
        }
    }

    #[test]
    fn test_sub_check_reduction_fails_on_any_failure() {
        let result = ProbeResult::from_sub_checks(
            "t1",
            ProbeType::ErrorCases,
            ProbeMetrics::default(),
            vec![
                SubCheck::passed("unknown path").with_response(404, 3.0),
                SubCheck::failed("invalid method", "accepted with status 200"),
                SubCheck::failed("malformed body", "accepted with status 201"),
            ],
        );

        assert_eq!(result.status, ProbeStatus::Failed);
        let error = result.error.unwrap();
        assert!(error.contains("invalid method: accepted with status 200"));
        assert!(error.contains("malformed body"));
    }

    #[test]
    fn test_sub_check_reduction_passes_when_all_pass() {
        let result = ProbeResult::from_sub_checks(
            "t1",
            ProbeType::Params,
            ProbeMetrics::default(),
            vec![SubCheck::passed("valid"), SubCheck::passed("empty")],
        );
        assert_eq!(result.status, ProbeStatus::Passed);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_empty_sub_checks_fail() {
        let result =
            ProbeResult::from_sub_checks("t1", ProbeType::Headers, ProbeMetrics::default(), vec![]);
        assert_eq!(result.status, ProbeStatus::Failed);
    }

    #[test]
    fn test_ui_reduction() {
        let checks = vec![
            UiCheck::new("https://example.com", "a", "navigate"),
            UiCheck::new("<img src=x>", "img", "load").fail("Image failed to load"),
        ];
        let result = ProbeResult::from_ui_checks("t1", ProbeType::Images, checks);
        assert_eq!(result.status, ProbeStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("1 of 2 elements failed"));

        let empty = ProbeResult::from_ui_checks("t1", ProbeType::Links, vec![]);
        assert_eq!(empty.status, ProbeStatus::Passed);
    }

    #[test]
    fn test_detail_is_tagged() {
        let result = ProbeResult::fault("t1", ProbeType::Forms, "boom");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["detail"]["category"], "ui");
        assert_eq!(value["probeType"], "forms");
        assert_eq!(value["endpointTaskId"], "t1");
    }
}
