use std::sync::Arc;

use crate::error::{QueueError, Result};
use crate::job::{Job, JobId, JobState, QueueStats};
use crate::storage::Storage;

/// Read-only queries over the job store, for dashboards and health checks.
/// It has no way to change a job.
#[derive(Clone)]
pub struct Inspector {
    storage: Arc<dyn Storage>,
}

impl Inspector {
    pub(crate) fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(self.storage.stats().await?)
    }

    /// Most recently updated jobs in `state`, newest first.
    pub async fn jobs(&self, state: JobState, limit: u32) -> Result<Vec<Job>> {
        Ok(self.storage.jobs_by_state(state, limit).await?)
    }

    pub async fn job(&self, id: &JobId) -> Result<Job> {
        self.storage
            .get_job(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.clone()))
    }

    pub async fn last_error(&self, id: &JobId) -> Result<Option<String>> {
        Ok(self.job(id).await?.last_error)
    }
}
