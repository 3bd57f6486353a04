pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::job::{ClaimedJob, Job, JobId, JobState, Lease, QueueStats};

pub use sqlite::SqliteStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// How an active job leaves its lease.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseRelease {
    pub state: JobState,
    /// New due time when the job goes back to `Delayed`.
    pub due_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub at: DateTime<Utc>,
    /// When set, the lease must still be unexpired at this instant. Worker
    /// reports set it; the reaper, which releases expired leases, does not.
    pub live_at: Option<DateTime<Utc>>,
}

/// Durable job store.
///
/// Every method is atomic with respect to concurrent callers; the store, not
/// the caller, serializes conflicting updates. Methods that act on an active
/// job are compare-and-swap on the lease token and report whether they won.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist a new job record in whatever state it carries.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Move every delayed job with `due_at <= now` to ready. Returns the number moved.
    async fn promote_due(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Pop the oldest ready job and mark it active under the given lease.
    async fn claim_next(
        &self,
        worker_id: &str,
        lease_token: &str,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<Option<Job>>;

    /// Count one attempt and apply `release` if the lease is still current
    /// (and, with `live_at`, not yet expired).
    async fn release_lease(&self, lease: &Lease, release: &LeaseRelease) -> Result<bool>;

    /// Active jobs whose lease ran out at or before `now`, with the lease they hold.
    async fn expired_leases(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ClaimedJob>>;

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>>;

    async fn jobs_by_state(&self, state: JobState, limit: u32) -> Result<Vec<Job>>;

    async fn stats(&self) -> Result<QueueStats>;
}
