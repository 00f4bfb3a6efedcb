//! Batch job orchestration
//!
//! Accepts submissions, runs endpoint tasks on a bounded worker pool and
//! finalizes job status. Jobs are always looked up by id through the store;
//! the orchestrator only keeps cancellation handles for jobs still running.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::worker::{fault_task, TaskWorker};
use crate::models::{
    EndpointTask, JobRecord, JobSnapshot, JobStatus, Submission, TaskStatus, TestConfig,
};
use crate::probes::ProbeExecutor;
use crate::results::{aggregate, summarize, JobStore, JobSummary, Report, StoreError};

/// Default number of endpoint tasks running at once
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Submission errors
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Submission has no endpoints")]
    NoEndpoints,

    #[error("Endpoint {0} has an empty url")]
    EmptyUrl(usize),

    #[error("No probe types are enabled")]
    NoProbesEnabled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct ActiveJob {
    /// Cancels in-flight probes
    cancel: CancellationToken,
    /// Cancelled by the runner once the job is final
    finished: CancellationToken,
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn ProbeExecutor>,
    max_concurrent: usize,
    active: Arc<Mutex<HashMap<String, ActiveJob>>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn JobStore>, executor: Arc<dyn ProbeExecutor>) -> Self {
        Self {
            store,
            executor,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate, persist and start a job. Returns its id.
    pub async fn submit(&self, submission: Submission) -> Result<String, SubmitError> {
        validate(&submission)?;

        let record = JobRecord::from_submission(&submission);
        let id = record.id().to_string();
        let tasks = record.tasks.clone();
        self.store.create(record).await?;

        info!(
            job_id = %id,
            kind = %submission.kind,
            endpoints = tasks.len(),
            "Job submitted"
        );

        if let Err(e) = self.store.set_status(&id, JobStatus::Running, None).await {
            error!(job_id = %id, "Job could not be scheduled: {}", e);
            self.store
                .set_status(&id, JobStatus::Failed, Some(format!("could not be scheduled: {e}")))
                .await?;
            return Ok(id);
        }

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        self.lock_active()?.insert(
            id.clone(),
            ActiveJob {
                cancel: cancel.clone(),
                finished: finished.clone(),
            },
        );

        let runner = JobRunner {
            id: id.clone(),
            store: Arc::clone(&self.store),
            executor: Arc::clone(&self.executor),
            config: Arc::new(submission.config),
            max_concurrent: self.max_concurrent,
            cancel,
        };
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            runner.run(tasks).await;
            if let Ok(mut active) = active.lock() {
                active.remove(&runner.id);
            }
            finished.cancel();
        });

        Ok(id)
    }

    /// Current status and counters
    pub async fn get_status(&self, id: &str) -> Result<JobSnapshot, StoreError> {
        self.store.snapshot(id).await
    }

    pub async fn get(&self, id: &str) -> Result<Arc<JobRecord>, StoreError> {
        self.store.get(id).await
    }

    /// All jobs in display order
    pub async fn list(&self) -> Result<Vec<JobSummary>, StoreError> {
        Ok(summarize(&self.store.list().await?))
    }

    pub async fn report(&self, id: &str) -> Result<Report, StoreError> {
        Ok(aggregate(&*self.store.get(id).await?))
    }

    /// Signal in-flight probes to stop. Finished jobs are left untouched.
    pub async fn cancel(&self, id: &str) -> Result<JobSnapshot, StoreError> {
        let snapshot = self.store.snapshot(id).await?;
        if let Some(job) = self.lock_active()?.get(id) {
            info!(job_id = %id, "Cancelling job");
            job.cancel.cancel();
        }
        Ok(snapshot)
    }

    /// Wait until the job is final and return its last snapshot
    pub async fn wait(&self, id: &str) -> Result<JobSnapshot, StoreError> {
        let finished = self.lock_active()?.get(id).map(|job| job.finished.clone());
        if let Some(finished) = finished {
            finished.cancelled().await;
        }
        self.store.snapshot(id).await
    }

    /// Cancel the job if it is running, then remove it
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let running = self.lock_active()?.remove(id);
        if let Some(job) = running {
            job.cancel.cancel();
        }
        self.store.delete(id).await?;
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// Retention policy: drop finished jobs created before `cutoff`
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        self.store.prune(cutoff).await
    }

    /// Jobs currently executing in this process
    pub fn active_jobs(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active
            .lock()
            .map(|active| active.contains_key(id))
            .unwrap_or(false)
    }

    fn lock_active(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, ActiveJob>>, StoreError> {
        self.active.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn validate(submission: &Submission) -> Result<(), SubmitError> {
    if submission.endpoints.is_empty() {
        return Err(SubmitError::NoEndpoints);
    }
    if let Some(position) = submission
        .endpoints
        .iter()
        .position(|e| e.url.trim().is_empty())
    {
        return Err(SubmitError::EmptyUrl(position));
    }
    if submission.enabled_probes().is_empty() {
        return Err(SubmitError::NoProbesEnabled);
    }
    Ok(())
}

struct JobRunner {
    id: String,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn ProbeExecutor>,
    config: Arc<TestConfig>,
    max_concurrent: usize,
    cancel: CancellationToken,
}

impl JobRunner {
    async fn run(&self, tasks: Vec<EndpointTask>) {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(tasks.len());

        for task in tasks.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let worker = TaskWorker {
                store: Arc::clone(&self.store),
                executor: Arc::clone(&self.executor),
                config: Arc::clone(&self.config),
                token: self.cancel.clone(),
            };

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                debug!(task_id = %task.id, "Starting {} {}", task.method, task.url);
                worker.run(task).await
            }));
        }

        let mut store_fault: Option<StoreError> = None;
        let mut failed_tasks = 0;

        for (task, joined) in tasks.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(TaskStatus::Failed)) => failed_tasks += 1,
                Ok(Ok(_)) => {}
                Ok(Err(StoreError::NotFound(_))) => {
                    debug!(job_id = %self.id, "Job deleted while running");
                    return;
                }
                Ok(Err(e)) => {
                    error!(job_id = %self.id, task_id = %task.id, "Failed to persist task: {}", e);
                    store_fault.get_or_insert(e);
                }
                Err(e) => {
                    // The worker itself died; keep the failure inside its task
                    warn!(job_id = %self.id, task_id = %task.id, "Task worker crashed: {}", e);
                    failed_tasks += 1;
                    let crashed = fault_task(task, &format!("task worker crashed: {e}"));
                    if let Err(e) = self.store.put_task(crashed).await {
                        store_fault.get_or_insert(e);
                    }
                }
            }
        }

        let (status, error) = if self.cancel.is_cancelled() {
            (JobStatus::Failed, Some("cancelled".to_string()))
        } else if let Some(e) = store_fault {
            (JobStatus::Failed, Some(format!("failed to record results: {e}")))
        } else {
            match self.store.snapshot(&self.id).await {
                Ok(s) if s.completed_endpoints == s.total_endpoints => (JobStatus::Completed, None),
                Ok(s) => (
                    JobStatus::Failed,
                    Some(format!(
                        "only {} of {} endpoints finished",
                        s.completed_endpoints, s.total_endpoints
                    )),
                ),
                Err(e) => {
                    warn!(job_id = %self.id, "Could not read final job state: {}", e);
                    return;
                }
            }
        };

        match self.store.set_status(&self.id, status, error).await {
            Ok(snapshot) => info!(
                job_id = %self.id,
                "Job {} in {}ms - {}/{} endpoints, {} failed",
                status,
                start.elapsed().as_millis(),
                snapshot.completed_endpoints,
                snapshot.total_endpoints,
                failed_tasks
            ),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => error!(job_id = %self.id, "Failed to finalize job: {}", e),
        }
    }
}
