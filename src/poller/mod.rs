//! Job status poller
//!
//! Polls a status source at a fixed interval until the job reaches a terminal
//! status or the attempt budget runs out. After the last attempt one grace
//! check runs after a longer delay; a job still running then is reported as
//! timed out, which is not an error.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::Orchestrator;
use crate::models::JobSnapshot;
use crate::results::StoreError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    #[error("Test {0} not found")]
    NotFound(String),

    #[error("Status query failed: {0}")]
    Transport(String),
}

/// Anything that can answer "what is the status of job X"
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self, id: &str) -> Result<JobSnapshot, PollError>;
}

#[async_trait]
impl StatusSource for Orchestrator {
    async fn status(&self, id: &str) -> Result<JobSnapshot, PollError> {
        self.get_status(id).await.map_err(|e| match e {
            StoreError::NotFound(id) => PollError::NotFound(id),
            other => PollError::Transport(other.to_string()),
        })
    }
}

/// Poller timing
#[derive(Clone, Debug)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub grace_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 60,
            grace_delay: Duration::from_secs(3),
        }
    }
}

impl PollConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn grace_delay(mut self, delay: Duration) -> Self {
        self.grace_delay = delay;
        self
    }
}

/// `Idle -> Polling -> {Done, TimedOut}`
#[derive(Clone, Debug, PartialEq)]
pub enum PollState {
    Idle,
    Polling { attempt: u32 },
    Done(JobSnapshot),
    /// Carries the last snapshot seen, if any query succeeded
    TimedOut(Option<JobSnapshot>),
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollState::Idle => write!(f, "idle"),
            PollState::Polling { attempt } => write!(f, "polling (attempt {attempt})"),
            PollState::Done(snapshot) => write!(f, "done: {snapshot}"),
            PollState::TimedOut(_) => write!(f, "still running, check later"),
        }
    }
}

pub struct StatusPoller<'a> {
    source: &'a dyn StatusSource,
    config: PollConfig,
    token: CancellationToken,
    state: PollState,
    queries: u32,
}

impl<'a> StatusPoller<'a> {
    pub fn new(source: &'a dyn StatusSource, config: PollConfig) -> Self {
        Self {
            source,
            config,
            token: CancellationToken::new(),
            state: PollState::Idle,
            queries: 0,
        }
    }

    /// Stop polling early when `token` is cancelled. The job keeps running.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Status queries issued so far, grace check included
    pub fn queries(&self) -> u32 {
        self.queries
    }

    pub async fn poll(&mut self, id: &str) -> PollState {
        self.poll_with(id, |_| {}).await
    }

    /// Poll until finished, calling `on_update` with every snapshot received
    pub async fn poll_with<F>(&mut self, id: &str, mut on_update: F) -> PollState
    where
        F: FnMut(&JobSnapshot),
    {
        let mut last: Option<JobSnapshot> = None;

        for attempt in 1..=self.config.max_attempts {
            self.state = PollState::Polling { attempt };

            if !self.pause(self.config.interval).await {
                return self.finish(PollState::TimedOut(last));
            }

            if let Some(snapshot) = self.query(id, attempt).await {
                on_update(&snapshot);
                if snapshot.is_terminal() {
                    info!("Test {} finished after {} queries: {}", id, self.queries, snapshot);
                    return self.finish(PollState::Done(snapshot));
                }
                last = Some(snapshot);
            }
        }

        debug!(
            "Test {} not finished after {} attempts, grace check in {:?}",
            id, self.config.max_attempts, self.config.grace_delay
        );
        if !self.pause(self.config.grace_delay).await {
            return self.finish(PollState::TimedOut(last));
        }

        if let Some(snapshot) = self.query(id, self.config.max_attempts + 1).await {
            on_update(&snapshot);
            if snapshot.is_terminal() {
                return self.finish(PollState::Done(snapshot));
            }
            last = Some(snapshot);
        }

        info!("Test {} is still running, check later", id);
        self.finish(PollState::TimedOut(last))
    }

    /// Sleep unless the token fires first; false when cancelled
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = sleep(delay) => true,
            _ = self.token.cancelled() => false,
        }
    }

    async fn query(&mut self, id: &str, attempt: u32) -> Option<JobSnapshot> {
        self.queries += 1;
        match self.source.status(id).await {
            Ok(snapshot) => {
                debug!("Poll {} for {}: {}", attempt, id, snapshot);
                Some(snapshot)
            }
            Err(e) => {
                // A job may not be visible yet right after submission
                warn!("Poll {} for {} failed: {}", attempt, id, e);
                None
            }
        }
    }

    fn finish(&mut self, state: PollState) -> PollState {
        self.state = state.clone();
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Pending until 0.1s, running until 2.3s, then completed
    struct Timeline {
        start: Instant,
        running_at: Duration,
        done_at: Option<Duration>,
        failures: Vec<u32>,
        calls: AtomicU32,
    }

    impl Timeline {
        fn new(done_at: Option<Duration>) -> Self {
            Self {
                start: Instant::now(),
                running_at: Duration::from_millis(100),
                done_at,
                failures: Vec::new(),
                calls: AtomicU32::new(0),
            }
        }

        fn failing_on(mut self, calls: &[u32]) -> Self {
            self.failures = calls.to_vec();
            self
        }
    }

    #[async_trait]
    impl StatusSource for Timeline {
        async fn status(&self, id: &str) -> Result<JobSnapshot, PollError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failures.contains(&call) {
                return Err(PollError::Transport("connection reset".into()));
            }

            let elapsed = self.start.elapsed();
            let status = match self.done_at {
                Some(done) if elapsed >= done => JobStatus::Completed,
                _ if elapsed >= self.running_at => JobStatus::Running,
                _ => JobStatus::Pending,
            };
            let completed_endpoints = if status == JobStatus::Completed { 2 } else { 0 };
            Ok(JobSnapshot {
                id: id.to_string(),
                status,
                total_endpoints: 2,
                completed_endpoints,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_observes_completion_on_third_query() {
        let source = Timeline::new(Some(Duration::from_millis(2300)));
        let mut poller = StatusPoller::new(&source, PollConfig::default());

        let mut seen = Vec::new();
        let state = poller.poll_with("job-1", |s| seen.push(s.status)).await;

        assert!(matches!(state, PollState::Done(ref s) if s.status == JobStatus::Completed));
        assert_eq!(poller.queries(), 3);
        assert_eq!(
            seen,
            vec![JobStatus::Running, JobStatus::Running, JobStatus::Completed]
        );
        let elapsed = source.start.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_grace_check() {
        let source = Timeline::new(None);
        let config = PollConfig::new()
            .max_attempts(5)
            .grace_delay(Duration::from_secs(3));
        let mut poller = StatusPoller::new(&source, config);

        let state = poller.poll("job-1").await;

        assert!(matches!(
            state,
            PollState::TimedOut(Some(ref s)) if s.status == JobStatus::Running
        ));
        assert_eq!(poller.queries(), 6);
        let elapsed = source.start.elapsed();
        assert!(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_secs(9));
        assert_eq!(state.to_string(), "still running, check later");
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_check_can_finish() {
        let source = Timeline::new(Some(Duration::from_millis(6500)));
        let config = PollConfig::new().max_attempts(5);
        let mut poller = StatusPoller::new(&source, config);

        let state = poller.poll("job-1").await;
        assert!(matches!(state, PollState::Done(_)));
        assert_eq!(poller.queries(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_consume_attempts() {
        let source = Timeline::new(Some(Duration::from_millis(2300))).failing_on(&[1, 3]);
        let mut poller = StatusPoller::new(&source, PollConfig::default());

        let state = poller.poll("job-1").await;
        assert!(matches!(state, PollState::Done(_)));
        assert_eq!(poller.queries(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_ends_in_timed_out() {
        let source = Timeline::new(None);
        let token = CancellationToken::new();
        let mut poller = StatusPoller::new(&source, PollConfig::default()).with_token(token.clone());

        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            token.cancel();
        });

        let state = poller.poll("job-1").await;
        assert!(matches!(state, PollState::TimedOut(Some(_))));
        assert_eq!(poller.queries(), 2);
        assert_eq!(poller.state(), &state);
    }

    #[tokio::test]
    async fn test_orchestrator_source() {
        use crate::models::{EndpointSpec, Submission, TestConfig};
        use crate::probes::testing::ScriptedExecutor;
        use crate::results::MemoryJobStore;
        use std::sync::Arc;

        let orchestrator = Orchestrator::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(ScriptedExecutor::new()),
        );
        let id = orchestrator
            .submit(Submission::api(
                vec![EndpointSpec::get("/a")],
                TestConfig::default(),
            ))
            .await
            .unwrap();

        let config = PollConfig::new().interval(Duration::from_millis(20));
        let mut poller = StatusPoller::new(&orchestrator, config);
        let state = poller.poll(&id).await;
        assert!(matches!(state, PollState::Done(ref s) if s.completed_endpoints == 1));

        let missing = orchestrator.status("nope").await.unwrap_err();
        assert_eq!(missing, PollError::NotFound("nope".into()));
    }
}
