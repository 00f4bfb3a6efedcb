//! Client for a remote autotester server

use async_trait::async_trait;

use super::routes::{ApiTestRequest, ResultDetail, SubmitResponse, UiTestRequest};
use crate::http::{HttpClient, HttpError};
use crate::models::{JobSnapshot, Submission};
use crate::poller::{PollError, StatusSource};
use crate::results::JobSummary;

#[derive(Clone)]
pub struct ApiClient {
    http: HttpClient,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(timeout_secs)?
                .base_url(base_url)
                .default_header("accept", "application/json")?,
        })
    }

    pub async fn submit_api(&self, request: &ApiTestRequest) -> Result<SubmitResponse, HttpError> {
        self.http.post_json("/api/api-test", request).await
    }

    pub async fn submit_ui(&self, request: &UiTestRequest) -> Result<SubmitResponse, HttpError> {
        self.http.post_json("/api/ui-test", request).await
    }

    /// Send a submission to the endpoint matching its kind
    pub async fn submit(&self, submission: Submission) -> Result<SubmitResponse, HttpError> {
        if submission.kind.is_ui() {
            let url = submission
                .endpoints
                .into_iter()
                .next()
                .map(|endpoint| endpoint.url)
                .unwrap_or_default();
            return self
                .submit_ui(&UiTestRequest {
                    url,
                    config: submission.config,
                    name: submission.name,
                })
                .await;
        }

        self.submit_api(&ApiTestRequest {
            endpoints: submission.endpoints,
            endpoint: None,
            config: submission.config,
            name: submission.name,
        })
        .await
    }

    pub async fn list(&self) -> Result<Vec<JobSummary>, HttpError> {
        self.http.get_json("/api/results").await
    }

    pub async fn detail(&self, id: &str) -> Result<ResultDetail, HttpError> {
        self.http.get_json(&format!("/api/results/{id}")).await
    }

    pub async fn cancel(&self, id: &str) -> Result<JobSnapshot, HttpError> {
        self.http
            .post_json(&format!("/api/results/{id}/cancel"), &serde_json::json!({}))
            .await
    }

    /// `Status(404)` when the job does not exist
    pub async fn delete(&self, id: &str) -> Result<(), HttpError> {
        let response = self.http.delete(&format!("/api/results/{id}")).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(HttpError::Status(response.status_code))
        }
    }
}

/// Status comes from the job listing, filtered by id
#[async_trait]
impl StatusSource for ApiClient {
    async fn status(&self, id: &str) -> Result<JobSnapshot, PollError> {
        let jobs = self
            .list()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        jobs.into_iter()
            .find(|job| job.id == id)
            .map(|job| JobSnapshot {
                id: job.id,
                status: job.status,
                total_endpoints: job.total_endpoints,
                completed_endpoints: job.completed_endpoints,
            })
            .ok_or_else(|| PollError::NotFound(id.to_string()))
    }
}
