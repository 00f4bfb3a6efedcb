//! Job storage and retrieval
//!
//! The `JobStore` trait is the only path through which job records change.
//! `FileJobStore` keeps the in-memory view authoritative and writes each
//! record through to a JSON file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::memory::MemoryJobStore;
use crate::models::{EndpointTask, JobRecord, JobSnapshot, JobStatus};

/// Job store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Task {0} does not belong to its job")]
    UnknownTask(String),

    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job store lock poisoned")]
    Poisoned,
}

/// Keyed persistence of jobs and their nested tasks
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, record: JobRecord) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Arc<JobRecord>, StoreError>;

    /// Status and counters only; never waits on in-flight probes
    async fn snapshot(&self, id: &str) -> Result<JobSnapshot, StoreError>;

    async fn list(&self) -> Result<Vec<Arc<JobRecord>>, StoreError>;

    /// Move the job forward. Setting the current status again is a no-op.
    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<JobSnapshot, StoreError>;

    /// Replace a task and bump `completedEndpoints` when it first turns terminal
    async fn put_task(&self, task: EndpointTask) -> Result<JobSnapshot, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Delete terminal jobs created before `cutoff`, returning their ids
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError>;
}

pub(crate) fn apply_status(
    record: &mut JobRecord,
    status: JobStatus,
    error: Option<String>,
) -> Result<(), StoreError> {
    let current = record.job.status;
    if current == status {
        return Ok(());
    }
    if !current.can_transition_to(status) {
        return Err(StoreError::InvalidTransition {
            id: record.job.id.clone(),
            from: current.to_string(),
            to: status.to_string(),
        });
    }

    record.job.status = status;
    if status.is_terminal() {
        record.job.completed_at = Some(Utc::now());
    }
    if error.is_some() {
        record.job.error = error;
    }
    Ok(())
}

pub(crate) fn apply_task(record: &mut JobRecord, task: EndpointTask) -> Result<(), StoreError> {
    let slot = record
        .tasks
        .get_mut(task.position)
        .filter(|t| t.id == task.id)
        .ok_or_else(|| StoreError::UnknownTask(task.id.clone()))?;

    let was_terminal = slot.status.is_terminal();
    if was_terminal && !task.status.is_terminal() {
        return Err(StoreError::InvalidTransition {
            id: task.id.clone(),
            from: slot.status.to_string(),
            to: task.status.to_string(),
        });
    }

    let now_terminal = task.status.is_terminal();
    *slot = task;

    if !was_terminal && now_terminal {
        let job = &mut record.job;
        job.completed_endpoints = (job.completed_endpoints + 1).min(job.total_endpoints);
    }
    Ok(())
}

/// Job store backed by one JSON file per job
pub struct FileJobStore {
    memory: MemoryJobStore,
    base_dir: PathBuf,
    // Serializes file writes so the newest record always lands last
    write_lock: Mutex<()>,
}

impl FileJobStore {
    /// Open a store, loading every record already on disk
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;

        let memory = MemoryJobStore::new();
        let mut loaded = 0;

        for entry in fs::read_dir(&base_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }

            match load_from_path(&path) {
                Ok(mut record) => {
                    if !record.job.status.is_terminal() {
                        // Nothing will ever finish a job from a previous process
                        apply_status(
                            &mut record,
                            JobStatus::Failed,
                            Some("interrupted before completion".to_string()),
                        )?;
                        if let Err(e) = write_record(&path, &record) {
                            warn!(
                                "Could not rewrite interrupted job {}: {}",
                                path.display(),
                                e
                            );
                        }
                    }
                    memory.insert(record)?;
                    loaded += 1;
                }
                Err(e) => warn!("Skipping unreadable job file {}: {}", path.display(), e),
            }
        }

        info!("Loaded {} jobs from {}", loaded, base_dir.display());
        Ok(Self {
            memory,
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Platform data directory, e.g. `~/.local/share/autotester/jobs`
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autotester")
            .join("jobs")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    /// Write the latest in-memory version of a job
    async fn persist(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let record = match self.memory.read(id) {
            Ok(record) => record,
            // Deleted while we waited for the lock
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let bytes = serde_json::to_vec_pretty(record.as_ref())?;
        let path = self.job_path(id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Saved job to {}", path.display());
        Ok(())
    }
}

fn load_from_path(path: &Path) -> Result<JobRecord, StoreError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// Replace `path` through a temp file so a crash never leaves it truncated
fn write_record(path: &Path, record: &JobRecord) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    let mut writer = BufWriter::new(File::create(&tmp)?);
    serde_json::to_writer_pretty(&mut writer, record)?;
    writer.flush()?;
    drop(writer);
    fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, record: JobRecord) -> Result<(), StoreError> {
        let id = record.id().to_string();
        self.memory.insert(record)?;
        self.persist(&id).await
    }

    async fn get(&self, id: &str) -> Result<Arc<JobRecord>, StoreError> {
        self.memory.read(id)
    }

    async fn snapshot(&self, id: &str) -> Result<JobSnapshot, StoreError> {
        Ok(self.memory.read(id)?.job.snapshot())
    }

    async fn list(&self) -> Result<Vec<Arc<JobRecord>>, StoreError> {
        self.memory.all()
    }

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<JobSnapshot, StoreError> {
        let record = self
            .memory
            .update(id, |record| apply_status(record, status, error))?;
        self.persist(id).await?;
        Ok(record.job.snapshot())
    }

    async fn put_task(&self, task: EndpointTask) -> Result<JobSnapshot, StoreError> {
        let job_id = task.job_id.clone();
        let record = self
            .memory
            .update(&job_id, |record| apply_task(record, task))?;
        self.persist(&job_id).await?;
        Ok(record.job.snapshot())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.memory.remove(id)?;

        match tokio::fs::remove_file(self.job_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("Deleted job: {id}");
        Ok(())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let ids = self.memory.expired(cutoff)?;
        for id in &ids {
            match self.delete(id).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if !ids.is_empty() {
            info!("Pruned {} expired jobs", ids.len());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EndpointSpec, ProbeResult, ProbeType, Submission, TestConfig};
    use tempfile::TempDir;

    fn record() -> JobRecord {
        JobRecord::from_submission(&Submission::api(
            vec![EndpointSpec::get("https://example.com/a")],
            TestConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_file_store_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let record = record();
        let id = record.id().to_string();

        {
            let store = FileJobStore::open(dir.path()).unwrap();
            store.create(record.clone()).await.unwrap();
            store
                .set_status(&id, JobStatus::Running, None)
                .await
                .unwrap();

            let mut task = record.tasks[0].clone();
            for probe in ProbeType::api() {
                task.record(ProbeResult::fault(&task.id, probe, "unreachable"));
            }
            store.put_task(task).await.unwrap();
            store
                .set_status(&id, JobStatus::Completed, None)
                .await
                .unwrap();
            assert!(dir.path().join(format!("{id}.json")).exists());
        }

        let reopened = FileJobStore::open(dir.path()).unwrap();
        let loaded = reopened.get(&id).await.unwrap();
        assert_eq!(loaded.job.status, JobStatus::Completed);
        assert_eq!(loaded.job.completed_endpoints, 1);
        assert_eq!(loaded.tasks[0].results.len(), 4);
    }

    #[tokio::test]
    async fn test_open_fails_interrupted_jobs() {
        let dir = TempDir::new().unwrap();
        let record = record();
        let id = record.id().to_string();

        {
            let store = FileJobStore::open(dir.path()).unwrap();
            store.create(record).await.unwrap();
            store
                .set_status(&id, JobStatus::Running, None)
                .await
                .unwrap();
        }

        let reopened = FileJobStore::open(dir.path()).unwrap();
        let loaded = reopened.get(&id).await.unwrap();
        assert_eq!(loaded.job.status, JobStatus::Failed);
        assert_eq!(
            loaded.job.error.as_deref(),
            Some("interrupted before completion")
        );
    }

    #[tokio::test]
    async fn test_interrupted_rewrite_replaces_file_atomically() {
        let dir = TempDir::new().unwrap();
        let record = record();
        let id = record.id().to_string();
        {
            let store = FileJobStore::open(dir.path()).unwrap();
            store.create(record).await.unwrap();
        }

        FileJobStore::open(dir.path()).unwrap();

        let path = dir.path().join(format!("{id}.json"));
        assert!(!path.with_extension("json.tmp").exists());
        let on_disk = load_from_path(&path).unwrap();
        assert_eq!(on_disk.job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_open_survives_unwritable_job_file() {
        let dir = TempDir::new().unwrap();
        let record = record();
        let id = record.id().to_string();
        {
            let store = FileJobStore::open(dir.path()).unwrap();
            store.create(record).await.unwrap();
        }
        // A directory in the temp file's place makes the rewrite fail
        let path = dir.path().join(format!("{id}.json"));
        fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let reopened = FileJobStore::open(dir.path()).unwrap();
        let loaded = reopened.get(&id).await.unwrap();
        assert_eq!(loaded.job.status, JobStatus::Failed);

        // The original file is left intact for the next open
        let on_disk = load_from_path(&path).unwrap();
        assert_eq!(on_disk.job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_delete_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();
        let record = record();
        let id = record.id().to_string();
        store.create(record).await.unwrap();

        store.delete(&id).await.unwrap();
        assert!(!dir.path().join(format!("{id}.json")).exists());
        assert!(matches!(
            store.delete(&id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_skips_garbage() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = FileJobStore::open(dir.path()).unwrap();
        let jobs = tokio_test::block_on(store.list()).unwrap();
        assert!(jobs.is_empty());
    }
}
