//! HTTP client for probing endpoints
//!
//! Thin wrapper over `reqwest` that measures every request and classifies
//! transport failures.

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// HTTP client errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Request budget exhausted")]
    BudgetExhausted,

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl HttpError {
    /// The request never produced an HTTP response
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HttpError::RequestFailed(_)
                | HttpError::Timeout(_)
                | HttpError::ConnectionRefused(_)
                | HttpError::InvalidUrl(_)
                | HttpError::InvalidMethod(_)
        )
    }
}

/// HTTP client for probes and the remote API client
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Option<String>,
    default_headers: HeaderMap,
    timeout: Duration,
}

impl HttpClient {
    /// Create a client whose requests time out after `timeout_secs`
    pub fn new(timeout_secs: u64) -> Result<Self, HttpError> {
        let timeout = Duration::from_secs(timeout_secs.max(1));
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| HttpError::RequestFailed(format!("failed to build client: {e}")))?;

        Ok(Self {
            client,
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout,
        })
    }

    /// Set base URL for relative request paths
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Add default header
    pub fn default_header(
        mut self,
        key: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, HttpError> {
        let name = HeaderName::from_bytes(key.as_ref().as_bytes())
            .map_err(|e| HttpError::RequestFailed(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value.as_ref())
            .map_err(|e| HttpError::RequestFailed(format!("invalid header value: {e}")))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build full URL
    fn build_url(&self, path: &str) -> String {
        match &self.base_url {
            Some(base) if !(path.starts_with("http://") || path.starts_with("https://")) => {
                format!("{}{}", base.trim_end_matches('/'), path)
            }
            _ => path.to_string(),
        }
    }

    /// Send HTTP request. Any HTTP status is a successful send; only
    /// transport-level failures are errors.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = self.build_url(&request.url);
        let parsed = reqwest::Url::parse(&url).map_err(|_| HttpError::InvalidUrl(url.clone()))?;
        debug!("Sending {} request to {}", request.method, parsed);

        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HttpError::InvalidMethod(request.method.clone()))?;

        let mut builder = self.client.request(method, parsed);

        for (key, value) in &self.default_headers {
            builder = builder.header(key, value);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let timeout = request.timeout.unwrap_or(self.timeout);
        builder = builder.timeout(timeout);

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(timeout.as_millis() as u64)
            } else if e.is_connect() {
                HttpError::ConnectionRefused(url.clone())
            } else {
                HttpError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string(), v.to_string());
            }
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(timeout.as_millis() as u64)
            } else {
                HttpError::RequestFailed(format!("failed to read response body: {e}"))
            }
        })?;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!(
            "Response: {} {} in {:.1}ms",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            duration_ms
        );

        Ok(HttpResponse {
            status_code: status.as_u16(),
            headers,
            size: body.len() as u64,
            body: String::from_utf8_lossy(&body).into_owned(),
            duration_ms,
        })
    }

    /// Convenience method for GET request
    pub async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.send(HttpRequest::get(url)).await
    }

    pub async fn head(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.send(HttpRequest::new("HEAD", url)).await
    }

    /// GET and decode a JSON body, treating non-2xx statuses as errors
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let response = self.get(url).await?;
        response.json()
    }

    /// POST a JSON payload and decode the JSON reply
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, HttpError> {
        let payload =
            serde_json::to_string(body).map_err(|e| HttpError::RequestFailed(e.to_string()))?;
        let request = HttpRequest::post(url)
            .header("Content-Type", "application/json")
            .body(payload);
        self.send(request).await?.json()
    }

    pub async fn delete(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.send(HttpRequest::delete(url)).await
    }
}

/// HTTP request builder
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    /// Overrides the client timeout for this request only
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new("DELETE", url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub size: u64,
    pub duration_ms: f64,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Anything below 400 counts as accepted by the server
    pub fn is_accepted(&self) -> bool {
        self.status_code < 400
    }

    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }

    pub fn get_header(&self, name: &str) -> Option<&String> {
        self.headers.get(&name.to_lowercase())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get_header("content-type").map(|s| s.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        if !self.is_success() {
            return Err(HttpError::Status(self.status_code));
        }
        serde_json::from_str(&self.body).map_err(|e| HttpError::Decode(e.to_string()))
    }
}
