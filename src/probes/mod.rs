//! Probe executors
//!
//! A probe executor runs one check against one endpoint and always returns a
//! `ProbeResult`. Faults inside a probe are reported as failed results, never
//! raised to the caller.
//!
//! ## API probes
//! - Query parameters
//! - Headers
//! - Response time
//! - Error cases
//!
//! ## UI probes
//! - Links
//! - Forms
//! - Buttons
//! - Images

mod api;
mod html;
mod ui;

pub use api::{ErrorCase, ErrorCasesProbe, HeadersProbe, ParamsProbe, ResponseTimeProbe};
pub use html::{find_elements, Element};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::http::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::models::{EndpointSpec, ProbeResult, ProbeType, TestConfig};

/// Requests one endpoint task may still issue, shared by all of its probes
#[derive(Clone, Debug)]
pub struct RequestBudget {
    remaining: Arc<AtomicUsize>,
}

impl RequestBudget {
    pub fn new(max_requests: usize) -> Self {
        Self {
            remaining: Arc::new(AtomicUsize::new(max_requests)),
        }
    }

    /// Take one request from the budget, false once it is spent
    pub fn try_acquire(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Everything a probe needs to run
#[derive(Clone, Debug)]
pub struct ProbeRequest {
    pub task_id: String,
    pub endpoint: EndpointSpec,
    pub probe_type: ProbeType,
    pub config: Arc<TestConfig>,
    pub budget: RequestBudget,
}

#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    async fn execute(&self, request: ProbeRequest) -> ProbeResult;
}

/// Limits applied by the default executor
#[derive(Clone, Debug, Default)]
pub struct ProbeSettings {
    /// Average response time above which the response-time probe fails
    pub max_response_time_ms: Option<f64>,
    /// Extra attempts after a transport failure
    pub retries: u32,
}

/// Default executor issuing real HTTP requests
#[derive(Clone)]
pub struct HttpProbeExecutor {
    client: HttpClient,
    settings: ProbeSettings,
}

impl HttpProbeExecutor {
    pub fn new(timeout_secs: u64) -> Result<Self, HttpError> {
        Ok(Self {
            client: HttpClient::new(timeout_secs)?,
            settings: ProbeSettings::default(),
        })
    }

    pub fn with_settings(mut self, settings: ProbeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Send with budget accounting and transport retries
    pub(crate) async fn dispatch(
        &self,
        budget: &RequestBudget,
        request: HttpRequest,
    ) -> Result<HttpResponse, HttpError> {
        let mut attempt = 0;
        loop {
            let result = self.dispatch_once(budget, request.clone()).await;
            match result {
                Err(ref e) if retryable(e) && attempt < self.settings.retries => {
                    attempt += 1;
                    debug!("Retrying {} ({}): {}", request.url, attempt, e);
                }
                other => return other,
            }
        }
    }

    /// Send exactly once; used where a failure is the expected outcome
    pub(crate) async fn dispatch_once(
        &self,
        budget: &RequestBudget,
        request: HttpRequest,
    ) -> Result<HttpResponse, HttpError> {
        if !budget.try_acquire() {
            return Err(HttpError::BudgetExhausted);
        }
        self.client.send(request).await
    }
}

fn retryable(error: &HttpError) -> bool {
    error.is_transport()
        && !matches!(error, HttpError::InvalidUrl(_) | HttpError::InvalidMethod(_))
}

#[async_trait]
impl ProbeExecutor for HttpProbeExecutor {
    async fn execute(&self, request: ProbeRequest) -> ProbeResult {
        debug!(
            "Running {} probe against {} {}",
            request.probe_type, request.endpoint.method, request.endpoint.url
        );

        match request.probe_type {
            ProbeType::Params => ParamsProbe::standard().run(self, &request).await,
            ProbeType::Headers => HeadersProbe::standard().run(self, &request).await,
            ProbeType::ResponseTime => {
                ResponseTimeProbe::new(5)
                    .threshold_ms(self.settings.max_response_time_ms)
                    .run(self, &request)
                    .await
            }
            ProbeType::ErrorCases => ErrorCasesProbe::standard().run(self, &request).await,
            ProbeType::Links => ui::check_links(self, &request).await,
            ProbeType::Forms => ui::check_forms(self, &request).await,
            ProbeType::Buttons => ui::check_buttons(self, &request).await,
            ProbeType::Images => ui::check_images(self, &request).await,
        }
    }
}

/// Base request for an endpoint: its method, headers and JSON body
pub(crate) fn base_request(endpoint: &EndpointSpec) -> HttpRequest {
    let mut request = HttpRequest::new(endpoint.normalized_method(), endpoint.url.clone())
        .headers(endpoint.headers.clone());

    if let Some(body) = &endpoint.request_body {
        let has_content_type = endpoint
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("content-type"));
        if !has_content_type {
            request = request.header("Content-Type", "application/json");
        }
        request = request.body(body.to_string());
    }
    request
}
