//! In-memory job store
//!
//! Records live behind a short-held `RwLock`. Readers clone an `Arc` and never
//! wait on a probe; writers build a new record and swap it in whole.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::storage::{apply_status, apply_task, JobStore, StoreError};
use crate::models::{EndpointTask, JobRecord, JobSnapshot, JobStatus};

#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<String, Arc<JobRecord>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        if records.contains_key(record.id()) {
            return Err(StoreError::AlreadyExists(record.id().to_string()));
        }
        records.insert(record.id().to_string(), Arc::new(record));
        Ok(())
    }

    pub(crate) fn read(&self, id: &str) -> Result<Arc<JobRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Copy the current record, apply `f` and replace the stored record.
    /// The write lock is held only for the copy and swap.
    pub(crate) fn update<F>(&self, id: &str, f: F) -> Result<Arc<JobRecord>, StoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), StoreError>,
    {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let current = records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut next = JobRecord::clone(current);
        f(&mut next)?;

        let next = Arc::new(next);
        records.insert(id.to_string(), Arc::clone(&next));
        Ok(next)
    }

    pub(crate) fn remove(&self, id: &str) -> Result<Arc<JobRecord>, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub(crate) fn all(&self) -> Result<Vec<Arc<JobRecord>>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.values().cloned().collect())
    }

    /// Ids of terminal jobs created before `cutoff`
    pub(crate) fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        let mut ids: Vec<String> = records
            .values()
            .filter(|r| r.job.status.is_terminal() && r.job.created_at < cutoff)
            .map(|r| r.job.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, record: JobRecord) -> Result<(), StoreError> {
        debug!(job_id = %record.id(), "Storing new job");
        self.insert(record)
    }

    async fn get(&self, id: &str) -> Result<Arc<JobRecord>, StoreError> {
        self.read(id)
    }

    async fn snapshot(&self, id: &str) -> Result<JobSnapshot, StoreError> {
        Ok(self.read(id)?.job.snapshot())
    }

    async fn list(&self) -> Result<Vec<Arc<JobRecord>>, StoreError> {
        self.all()
    }

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<JobSnapshot, StoreError> {
        let record = self.update(id, |record| apply_status(record, status, error))?;
        Ok(record.job.snapshot())
    }

    async fn put_task(&self, task: EndpointTask) -> Result<JobSnapshot, StoreError> {
        let job_id = task.job_id.clone();
        let record = self.update(&job_id, |record| apply_task(record, task))?;
        Ok(record.job.snapshot())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.remove(id).map(|_| ())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let ids = self.expired(cutoff)?;
        for id in &ids {
            // A concurrent delete may have won the race
            match self.remove(id) {
                Ok(_) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(ids)
    }
}
