//! API probes
//!
//! Query parameters, headers, response time and error cases. Each probe
//! issues a handful of sub-requests and collapses them into one result.

use std::time::Duration;
use tracing::{debug, info};

use super::{base_request, HttpProbeExecutor, ProbeRequest};
use crate::http::{HttpError, HttpResponse};
use crate::models::{ProbeMetrics, ProbeResult, ProbeType, SubCheck};

/// Named set of query parameters
#[derive(Clone, Debug)]
pub struct QuerySet {
    pub label: String,
    pub params: Vec<(String, String)>,
}

/// Sends the endpoint request with several query sets; each must be accepted
#[derive(Clone, Debug, Default)]
pub struct ParamsProbe {
    pub query_sets: Vec<QuerySet>,
}

impl ParamsProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_query_set(mut self, label: impl Into<String>, params: &[(&str, &str)]) -> Self {
        self.query_sets.push(QuerySet {
            label: label.into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self
    }

    /// Valid, invalid and empty pagination parameters
    pub fn standard() -> Self {
        Self::new()
            .add_query_set("valid", &[("page", "1"), ("limit", "10")])
            .add_query_set("invalid", &[("page", "invalid"), ("limit", "-1")])
            .add_query_set("empty", &[("page", ""), ("limit", "")])
    }

    pub async fn run(&self, executor: &HttpProbeExecutor, request: &ProbeRequest) -> ProbeResult {
        info!("Running Query Parameters probe: {}", request.endpoint.url);
        let mut checks = Vec::new();
        let mut responses = Vec::new();

        for set in &self.query_sets {
            debug!("Testing query set: {}", set.label);

            let mut http = base_request(&request.endpoint);
            for (key, value) in &set.params {
                http = http.query_param(key.clone(), value.clone());
            }

            let label = format!("params {}", set.label);
            match executor.dispatch(&request.budget, http).await {
                Ok(resp) => {
                    checks.push(accepted_check(label, &resp));
                    responses.push(resp);
                }
                Err(HttpError::BudgetExhausted) => break,
                Err(e) => checks.push(SubCheck::failed(label, e.to_string())),
            }
        }

        finish(request, ProbeType::Params, summarize(&responses), checks)
    }
}

/// Sends the endpoint request with extra headers; each must be accepted
#[derive(Clone, Debug, Default)]
pub struct HeadersProbe {
    pub header_sets: Vec<(String, String)>,
}

impl HeadersProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header_sets.push((name.into(), value.into()));
        self
    }

    pub fn standard() -> Self {
        Self::new()
            .add_header("Accept", "application/json")
            .add_header("Accept", "application/xml")
            .add_header("Content-Type", "application/json")
            .add_header("Authorization", "Bearer test-token")
    }

    pub async fn run(&self, executor: &HttpProbeExecutor, request: &ProbeRequest) -> ProbeResult {
        info!("Running Headers probe: {}", request.endpoint.url);
        let mut checks = Vec::new();
        let mut responses = Vec::new();

        for (name, value) in &self.header_sets {
            debug!("Testing header: {}={}", name, value);

            let http = base_request(&request.endpoint).header(name.clone(), value.clone());
            let label = format!("header {name}: {value}");
            match executor.dispatch(&request.budget, http).await {
                Ok(resp) => {
                    checks.push(accepted_check(label, &resp));
                    responses.push(resp);
                }
                Err(HttpError::BudgetExhausted) => break,
                Err(e) => checks.push(SubCheck::failed(label, e.to_string())),
            }
        }

        finish(request, ProbeType::Headers, summarize(&responses), checks)
    }
}

/// Sequential samples of the endpoint request
#[derive(Clone, Debug)]
pub struct ResponseTimeProbe {
    pub samples: usize,
    pub threshold_ms: Option<f64>,
}

impl ResponseTimeProbe {
    pub fn new(samples: usize) -> Self {
        Self {
            samples: samples.max(1),
            threshold_ms: None,
        }
    }

    pub fn threshold_ms(mut self, threshold_ms: Option<f64>) -> Self {
        self.threshold_ms = threshold_ms;
        self
    }

    pub async fn run(&self, executor: &HttpProbeExecutor, request: &ProbeRequest) -> ProbeResult {
        info!("Running Response Time probe: {}", request.endpoint.url);
        let mut checks = Vec::new();
        let mut responses: Vec<HttpResponse> = Vec::new();

        for sample in 1..=self.samples {
            let label = format!("sample {sample}");
            match executor
                .dispatch(&request.budget, base_request(&request.endpoint))
                .await
            {
                Ok(resp) => {
                    checks.push(
                        SubCheck::passed(label).with_response(resp.status_code, resp.duration_ms),
                    );
                    responses.push(resp);
                }
                Err(HttpError::BudgetExhausted) => break,
                Err(e) => {
                    checks.push(SubCheck::failed(label, e.to_string()));
                    break;
                }
            }
        }

        let metrics = summarize(&responses);
        if let (Some(limit), Some(avg)) = (self.threshold_ms, metrics.response_time_ms) {
            let label = format!("average under {limit}ms");
            if avg > limit {
                checks.push(SubCheck::failed(label, format!("average was {avg:.1}ms")));
            } else {
                checks.push(SubCheck::passed(label));
            }
        }

        finish(request, ProbeType::ResponseTime, metrics, checks)
    }
}

/// Requests the server is expected to reject
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorCase {
    UnknownPath,
    InvalidMethod,
    TightTimeout(Duration),
    MalformedBody,
}

impl ErrorCase {
    pub fn label(&self) -> String {
        match self {
            ErrorCase::UnknownPath => "unknown path".to_string(),
            ErrorCase::InvalidMethod => "invalid method".to_string(),
            ErrorCase::TightTimeout(d) => format!("timeout {}ms", d.as_millis()),
            ErrorCase::MalformedBody => "malformed JSON body".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ErrorCasesProbe {
    pub cases: Vec<ErrorCase>,
}

impl ErrorCasesProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_case(mut self, case: ErrorCase) -> Self {
        self.cases.push(case);
        self
    }

    pub fn standard() -> Self {
        Self::new()
            .add_case(ErrorCase::UnknownPath)
            .add_case(ErrorCase::InvalidMethod)
            .add_case(ErrorCase::TightTimeout(Duration::from_millis(1)))
            .add_case(ErrorCase::MalformedBody)
    }

    pub async fn run(&self, executor: &HttpProbeExecutor, request: &ProbeRequest) -> ProbeResult {
        info!("Running Error Cases probe: {}", request.endpoint.url);
        let mut checks = Vec::new();
        let mut responses = Vec::new();

        for case in &self.cases {
            let mut http = base_request(&request.endpoint);
            match case {
                ErrorCase::UnknownPath => {
                    http.url = format!(
                        "{}/autotester-nonexistent-path",
                        request.endpoint.url.trim_end_matches('/')
                    );
                }
                ErrorCase::InvalidMethod => http.method = "INVALID_METHOD".to_string(),
                ErrorCase::TightTimeout(limit) => http = http.timeout(*limit),
                ErrorCase::MalformedBody => {
                    http = http
                        .header("Content-Type", "application/json")
                        .body(r#"{"invalid": "json""#);
                }
            }

            let label = case.label();
            match executor.dispatch_once(&request.budget, http).await {
                Ok(resp) if resp.is_error() => {
                    checks.push(SubCheck::passed(label).with_response(resp.status_code, resp.duration_ms));
                    responses.push(resp);
                }
                Ok(resp) => {
                    checks.push(
                        SubCheck::failed(label, format!("accepted with status {}", resp.status_code))
                            .with_response(resp.status_code, resp.duration_ms),
                    );
                    responses.push(resp);
                }
                Err(HttpError::BudgetExhausted) => break,
                // Rejected before any response: the case was refused
                Err(e) if e.is_transport() => {
                    let mut check = SubCheck::passed(label);
                    check.error = Some(e.to_string());
                    checks.push(check);
                }
                Err(e) => checks.push(SubCheck::failed(label, e.to_string())),
            }
        }

        finish(request, ProbeType::ErrorCases, summarize(&responses), checks)
    }
}

fn accepted_check(label: String, resp: &HttpResponse) -> SubCheck {
    let check = if resp.is_accepted() {
        SubCheck::passed(label)
    } else {
        SubCheck::failed(label, format!("HTTP {}", resp.status_code))
    };
    check.with_response(resp.status_code, resp.duration_ms)
}

/// Average, min and max timing plus the first response's status and size
fn summarize(responses: &[HttpResponse]) -> ProbeMetrics {
    let Some(first) = responses.first() else {
        return ProbeMetrics::default();
    };

    let times: Vec<f64> = responses.iter().map(|r| r.duration_ms).collect();
    let avg = times.iter().sum::<f64>() / times.len() as f64;
    let min = times.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = times.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    ProbeMetrics {
        response_time_ms: Some(avg),
        min_response_time_ms: Some(min),
        max_response_time_ms: Some(max),
        status_code: Some(first.status_code),
        response_size: Some(first.size),
        content_type: first.content_type().map(str::to_string),
    }
}

fn finish(
    request: &ProbeRequest,
    probe_type: ProbeType,
    metrics: ProbeMetrics,
    checks: Vec<SubCheck>,
) -> ProbeResult {
    if checks.is_empty() && request.budget.is_exhausted() {
        return ProbeResult::fault(&request.task_id, probe_type, "request budget exhausted");
    }
    ProbeResult::from_sub_checks(&request.task_id, probe_type, metrics, checks)
}
