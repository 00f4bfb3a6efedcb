//! Route handlers and wire types for the HTTP API

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{error::AppError, AppState};
use crate::models::{BatchJob, EndpointSpec, JobSnapshot, Submission, TestConfig};
use crate::results::{JobSummary, Report, ReportFormat, ReportGenerator};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTestRequest {
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
    /// Single-endpoint form: `{ "endpoint": "https://..." }`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub config: TestConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ApiTestRequest {
    pub fn into_submission(self) -> Submission {
        let mut endpoints = self.endpoints;
        if endpoints.is_empty() {
            if let Some(url) = self.endpoint {
                endpoints.push(EndpointSpec::get(url));
            }
        }
        let submission = Submission::api(endpoints, self.config);
        match self.name {
            Some(name) => submission.with_name(name),
            None => submission,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiTestRequest {
    pub url: String,
    #[serde(default)]
    pub config: TestConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub test_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultDetail {
    pub job: BatchJob,
    pub report: Report,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/api-test", post(start_api_test))
        .route("/api/ui-test", post(start_ui_test))
        .route("/api/results", get(list_results))
        .route(
            "/api/results/{id}",
            get(get_result).delete(delete_result),
        )
        .route("/api/results/{id}/status", get(get_status))
        .route("/api/results/{id}/export", get(export_result))
        .route("/api/results/{id}/cancel", post(cancel_result))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeJobs": state.orchestrator.active_jobs(),
    }))
}

async fn start_api_test(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ApiTestRequest>,
) -> Result<Json<SubmitResponse>, AppError> {
    let test_id = state.orchestrator.submit(payload.into_submission()).await?;
    Ok(Json(SubmitResponse {
        test_id,
        message: "API test started successfully".to_string(),
    }))
}

async fn start_ui_test(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UiTestRequest>,
) -> Result<Json<SubmitResponse>, AppError> {
    if payload.url.trim().is_empty() {
        return Err(AppError::InvalidInput("URL is required".to_string()));
    }
    let mut submission = Submission::ui(payload.url, payload.config);
    if let Some(name) = payload.name {
        submission = submission.with_name(name);
    }

    let test_id = state.orchestrator.submit(submission).await?;
    Ok(Json(SubmitResponse {
        test_id,
        message: "UI test started successfully".to_string(),
    }))
}

async fn list_results(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<JobSummary>>, AppError> {
    Ok(Json(state.orchestrator.list().await?))
}

async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ResultDetail>, AppError> {
    let record = state.orchestrator.get(&id).await?;
    Ok(Json(ResultDetail {
        job: record.job.clone(),
        report: crate::results::aggregate(&record),
    }))
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    Ok(Json(state.orchestrator.get_status(&id).await?))
}

async fn export_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let format = match query.format.as_deref() {
        None => ReportFormat::Json,
        Some(f) => ReportFormat::from_str(f)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown export format: {f}")))?,
    };

    let report = state.orchestrator.report(&id).await?;
    let body = ReportGenerator::render(&report, format)?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], body))
}

async fn cancel_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    Ok(Json(state.orchestrator.cancel(&id).await?))
}

async fn delete_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.orchestrator.delete(&id).await?;
    info!("Deleted test result {}", id);
    Ok(Json(serde_json::json!({
        "message": "Test result deleted successfully"
    })))
}
