//! Endpoint task worker
//!
//! Runs every enabled probe for one task. Each probe executes on its own
//! tokio task so a panic or hang inside an executor stays with that probe.

use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::{EndpointTask, ProbeResult, TaskStatus, TestConfig};
use crate::probes::{ProbeExecutor, ProbeRequest, RequestBudget};
use crate::results::{JobStore, StoreError};

pub(crate) struct TaskWorker {
    pub store: Arc<dyn JobStore>,
    pub executor: Arc<dyn ProbeExecutor>,
    pub config: Arc<TestConfig>,
    pub token: CancellationToken,
}

impl TaskWorker {
    /// Run all probes of `task` and persist it once every probe reported.
    /// Cancellation stops at the next probe boundary; unreported probes are
    /// recorded as cancelled so the task still ends terminal.
    pub async fn run(&self, mut task: EndpointTask) -> Result<TaskStatus, StoreError> {
        if !self.token.is_cancelled() {
            task.mark_running();
            self.store.put_task(task.clone()).await?;
        }

        let budget = RequestBudget::new(self.config.max_requests);

        for probe_type in task.expected_probes.clone() {
            if self.token.is_cancelled() {
                break;
            }

            let request = ProbeRequest {
                task_id: task.id.clone(),
                endpoint: task.spec(),
                probe_type,
                config: Arc::clone(&self.config),
                budget: budget.clone(),
            };

            let executor = Arc::clone(&self.executor);
            let mut handle = tokio::spawn(async move { executor.execute(request).await });

            let mut result = tokio::select! {
                joined = &mut handle => match joined {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        let message = panic_message(e.into_panic());
                        warn!(task_id = %task.id, "{} probe panicked: {}", probe_type, message);
                        ProbeResult::fault(&task.id, probe_type, format!("probe panicked: {message}"))
                    }
                    Err(e) => ProbeResult::fault(&task.id, probe_type, format!("probe aborted: {e}")),
                },
                _ = self.token.cancelled() => {
                    handle.abort();
                    ProbeResult::cancelled(&task.id, probe_type)
                }
            };

            // Executors own the payload, not the identity of the result
            result.endpoint_task_id = task.id.clone();
            result.probe_type = probe_type;

            debug!(task_id = %task.id, "{}", result);
            task.record(result);
        }

        for probe_type in task.missing_probes() {
            task.record(ProbeResult::cancelled(&task.id, probe_type));
        }

        let status = task.status;
        self.store.put_task(task).await?;
        Ok(status)
    }
}

/// Replace whatever a crashed worker left behind with failed results
pub(crate) fn fault_task(mut task: EndpointTask, message: &str) -> EndpointTask {
    for probe_type in task.missing_probes() {
        task.record(ProbeResult::fault(&task.id, probe_type, message));
    }
    task
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
