//! HTTP API
//!
//! Exposes submission, listing, status, export, cancel and delete over JSON.
//!
//! ## Routes
//! - `POST /api/api-test`, `POST /api/ui-test`
//! - `GET /api/results`, `GET|DELETE /api/results/{id}`
//! - `GET /api/results/{id}/status`, `GET /api/results/{id}/export?format=`
//! - `POST /api/results/{id}/cancel`
//! - `GET /health`

mod client;
mod error;
mod routes;

pub use client::ApiClient;
pub use error::AppError;
pub use routes::{ApiTestRequest, ResultDetail, SubmitResponse, UiTestRequest};

use anyhow::{Context, Result};
use axum::Router;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::executor::Orchestrator;

const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn create_app(orchestrator: Arc<Orchestrator>) -> Router {
    routes::create_router().with_state(Arc::new(AppState { orchestrator }))
}

/// Serve until Ctrl-C. With `retention` set, finished jobs older than it are
/// pruned every hour.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    bind: &str,
    retention: Option<Duration>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    if let Some(retention) = retention {
        spawn_pruner(Arc::clone(&orchestrator), retention, shutdown.clone());
    }

    let app = create_app(orchestrator);
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
            signal.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    Ok(())
}

fn spawn_pruner(orchestrator: Arc<Orchestrator>, retention: Duration, shutdown: CancellationToken) {
    info!("Pruning finished jobs older than {:?}", retention);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            let Ok(age) = chrono::Duration::from_std(retention) else {
                warn!("Retention {:?} is out of range, pruning disabled", retention);
                break;
            };
            match orchestrator.prune(Utc::now() - age).await {
                Ok(removed) if !removed.is_empty() => {
                    info!("Pruned {} expired jobs", removed.len());
                }
                Ok(_) => {}
                Err(e) => warn!("Prune failed: {}", e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EndpointSpec, JobStatus, Submission, TaskStatus, TestConfig};
    use crate::poller::{PollConfig, PollState, StatusPoller};
    use crate::probes::testing::ScriptedExecutor;
    use crate::results::MemoryJobStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn orchestrator() -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(ScriptedExecutor::new()),
        ))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn submit_two(app: &Router) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/api-test",
            Some(serde_json::json!({
                "endpoints": [
                    {"url": "/a", "method": "GET"},
                    {"url": "/b", "method": "POST"}
                ],
                "config": {"testErrorCases": true}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let reply: SubmitResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(reply.message, "API test started successfully");
        reply.test_id
    }

    #[tokio::test]
    async fn test_submit_and_fetch_report() {
        let orchestrator = orchestrator();
        let app = create_app(Arc::clone(&orchestrator));
        let id = submit_two(&app).await;
        orchestrator.wait(&id).await.unwrap();

        let (status, body) = call(&app, Method::GET, &format!("/api/results/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let detail: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(detail["job"]["status"], "completed");
        assert_eq!(detail["report"]["allTests"].as_array().unwrap().len(), 8);
        assert_eq!(detail["report"]["byMethod"][0]["method"], "GET");
        assert_eq!(detail["report"]["byMethod"][0]["endpoints"][0]["url"], "/a");
        assert_eq!(detail["report"]["byMethod"][1]["endpoints"][0]["url"], "/b");

        let (_, body) = call(&app, Method::GET, &format!("/api/results/{id}/status"), None).await;
        let snapshot: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(snapshot["completedEndpoints"], 2);
        assert_eq!(snapshot["totalEndpoints"], 2);
    }

    #[tokio::test]
    async fn test_single_endpoint_form() {
        let orchestrator = orchestrator();
        let app = create_app(Arc::clone(&orchestrator));
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/api-test",
            Some(serde_json::json!({"endpoint": "/items"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let reply: SubmitResponse = serde_json::from_str(&body).unwrap();
        let record = orchestrator.get(&reply.test_id).await.unwrap();
        assert_eq!(record.tasks.len(), 1);
        assert_eq!(record.tasks[0].url, "/items");
    }

    #[tokio::test]
    async fn test_invalid_submissions() {
        let app = create_app(orchestrator());

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/api-test",
            Some(serde_json::json!({"endpoints": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("no endpoints"));

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/ui-test",
            Some(serde_json::json!({"url": " "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_listing_and_export() {
        let orchestrator = orchestrator();
        let app = create_app(Arc::clone(&orchestrator));
        let id = submit_two(&app).await;
        orchestrator.wait(&id).await.unwrap();

        let (status, body) = call(&app, Method::GET, "/api/results", None).await;
        assert_eq!(status, StatusCode::OK);
        let jobs: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["passRate"], 100.0);

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/api/results/{id}/export?format=csv"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("Endpoint,URL,Method,Test"));

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/results/{id}/export?format=xml"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete() {
        let orchestrator = orchestrator();
        let app = create_app(Arc::clone(&orchestrator));

        let (status, body) = call(&app, Method::DELETE, "/api/results/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Test result not found"));

        let id = submit_two(&app).await;
        orchestrator.wait(&id).await.unwrap();
        let (status, _) = call(&app, Method::DELETE, &format!("/api/results/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, Method::GET, &format!("/api/results/{id}/status"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_over_http() {
        let orchestrator = orchestrator();
        let app = create_app(Arc::clone(&orchestrator));

        let (status, body) = call(&app, Method::POST, "/api/results/missing/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("Test result not found"));

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/api-test",
            Some(serde_json::json!({
                "endpoints": [{"url": "/quick"}, {"url": "/slow"}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let id = serde_json::from_str::<SubmitResponse>(&body).unwrap().test_id;

        tokio::time::sleep(Duration::from_millis(300)).await;
        let (status, body) =
            call(&app, Method::POST, &format!("/api/results/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        let snapshot: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(snapshot["id"], id.as_str());
        assert_eq!(snapshot["totalEndpoints"], 2);

        let finished = orchestrator.wait(&id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.completed_endpoints, 2);

        let (_, body) = call(&app, Method::GET, &format!("/api/results/{id}"), None).await;
        let detail: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(detail["job"]["status"], "failed");
        assert_eq!(detail["job"]["error"], "cancelled");

        let record = orchestrator.get(&id).await.unwrap();
        assert_eq!(record.tasks[0].status, TaskStatus::Passed);
        assert!(!record.tasks[0].results.is_empty());
        assert_eq!(record.tasks[1].status, TaskStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pruner_removes_expired_finished_jobs() {
        let orchestrator = orchestrator();
        let shutdown = CancellationToken::new();

        let first = orchestrator
            .submit(Submission::api(vec![EndpointSpec::get("/a")], TestConfig::default()))
            .await
            .unwrap();
        orchestrator.wait(&first).await.unwrap();
        // Retention is measured on the wall clock
        std::thread::sleep(Duration::from_millis(5));

        spawn_pruner(
            Arc::clone(&orchestrator),
            Duration::from_millis(1),
            shutdown.clone(),
        );

        // The first tick fires immediately
        for _ in 0..50 {
            if orchestrator.get_status(&first).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(orchestrator.get_status(&first).await.is_err());

        let second = orchestrator
            .submit(Submission::api(vec![EndpointSpec::get("/b")], TestConfig::default()))
            .await
            .unwrap();
        orchestrator.wait(&second).await.unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(orchestrator.get_status(&second).await.is_ok());

        // Kept until the next hourly pass
        tokio::time::sleep(PRUNE_INTERVAL + Duration::from_secs(1)).await;
        assert!(orchestrator.get_status(&second).await.is_err());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_app(orchestrator());
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let health: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["activeJobs"], 0);
    }

    #[tokio::test]
    async fn test_remote_client_polls_to_completion() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = create_app(orchestrator());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = ApiClient::new(&base, 5).unwrap();
        let submission = Submission::api(
            vec![EndpointSpec::get("/a"), EndpointSpec::new("/b", "POST")],
            TestConfig::default(),
        );
        let reply = client.submit(submission).await.unwrap();
        assert_eq!(reply.message, "API test started successfully");

        let config = PollConfig::new().interval(Duration::from_millis(20));
        let mut poller = StatusPoller::new(&client, config);
        let state = poller.poll(&reply.test_id).await;
        assert!(matches!(
            state,
            PollState::Done(ref s) if s.status == JobStatus::Completed && s.completed_endpoints == 2
        ));

        let detail = client.detail(&reply.test_id).await.unwrap();
        assert_eq!(detail.report.all_tests.len(), 8);

        client.delete(&reply.test_id).await.unwrap();
        assert_eq!(
            client.delete(&reply.test_id).await.unwrap_err(),
            crate::http::HttpError::Status(404)
        );
    }
}
