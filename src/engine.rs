//! The queue engine: every job state transition goes through here.
//!
//! ```text
//! Delayed --promote_due--> Ready --claim--> Active --acknowledge--> Completed
//!    ^                                        |
//!    +------------- fail / lease expiry ------+--(attempts exhausted)--> Failed
//! ```
//!
//! Workers never touch the store directly. They hold a [`Lease`] from
//! [`QueueEngine::claim`] and hand it back through [`QueueEngine::acknowledge`]
//! or [`QueueEngine::fail`]. A lease that has been reaped or superseded is
//! rejected with [`QueueError::WrongState`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{QueueError, Result};
use crate::inspect::Inspector;
use crate::job::{latest_ts, ClaimedJob, Job, JobId, JobState, Lease, NewJob};
use crate::retry::RetryPolicy;
use crate::storage::{LeaseRelease, Storage};

const REAP_BATCH: u32 = 100;

/// What a failed attempt turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back in the delayed index, eligible again at `due_at`.
    Retrying { due_at: DateTime<Utc>, attempts: u32 },
    /// Attempts exhausted; the job is terminal.
    Failed { attempts: u32 },
}

#[derive(Clone)]
pub struct QueueEngine {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    default_max_attempts: u32,
}

impl QueueEngine {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            retry: RetryPolicy::default(),
            default_max_attempts: 1,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Read-only view for the admin interface.
    pub fn inspector(&self) -> Inspector {
        Inspector::new(Arc::clone(&self.storage))
    }

    /// Validate a submission and persist it as a new job.
    ///
    /// The job starts out `Ready` when it is already due and `Delayed`
    /// otherwise. Nothing is written when validation fails.
    pub async fn enqueue(&self, new: NewJob) -> Result<Job> {
        let payload = match new.payload.clone() {
            Some(serde_json::Value::Null) | None => {
                return Err(QueueError::InvalidInput("Missing data".to_string()))
            }
            Some(payload) => payload,
        };

        let target_url = match new.target_url.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(url) => Some(validate_url(url)?),
        };

        let max_attempts = new.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts == 0 {
            return Err(QueueError::InvalidInput(
                "maxAttempts must be at least 1".to_string(),
            ));
        }

        let now = self.now();
        let due_at = new.resolve_due_at(now).ok_or_else(|| {
            QueueError::InvalidInput(format!("Due time must not be later than {}", latest_ts()))
        })?;
        let state = if due_at > now {
            JobState::Delayed
        } else {
            JobState::Ready
        };

        let job = Job {
            id: JobId::new(),
            name: new.name,
            payload,
            target_url,
            due_at,
            state,
            attempts: 0,
            max_attempts,
            claimed_by: None,
            lease_expires_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        self.storage.insert(&job).await?;

        info!(
            job_id = %job.id,
            name = %job.name,
            due_at = %job.due_at,
            state = %job.state,
            "Job scheduled"
        );
        Ok(job)
    }

    /// Move every delayed job that is due at `now` into the ready queue.
    /// Calling it again with the same `now` is a no-op.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let promoted = self.storage.promote_due(now).await?;
        if promoted > 0 {
            debug!(count = promoted, "Promoted due jobs");
        }
        Ok(promoted)
    }

    /// Take the next ready job for `worker_id`. `None` means the ready queue
    /// is empty, which is not an error.
    pub async fn claim(
        &self,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Option<ClaimedJob>> {
        let now = self.now();
        let expires_at = after(now, lease_duration);
        let token = uuid::Uuid::new_v4().to_string();

        let Some(job) = self
            .storage
            .claim_next(worker_id, &token, now, expires_at)
            .await?
        else {
            return Ok(None);
        };

        debug!(job_id = %job.id, worker_id, %expires_at, "Job claimed");

        let lease = Lease {
            job_id: job.id.clone(),
            worker_id: worker_id.to_string(),
            token,
            expires_at,
        };
        Ok(Some(ClaimedJob { job, lease }))
    }

    /// Mark the leased job completed. An expired lease is rejected even
    /// before the reaper has reclaimed the job.
    pub async fn acknowledge(&self, lease: &Lease) -> Result<()> {
        let now = self.now();
        let release = LeaseRelease {
            state: JobState::Completed,
            due_at: None,
            last_error: None,
            at: now,
            live_at: Some(now),
        };

        if self.storage.release_lease(lease, &release).await? {
            info!(job_id = %lease.job_id, worker_id = %lease.worker_id, "Job completed");
            return Ok(());
        }

        Err(self.lost_lease(&lease.job_id).await)
    }

    /// Record a failed attempt. The job is retried after a backoff while
    /// attempts remain, and fails permanently otherwise.
    pub async fn fail(&self, lease: &Lease, reason: &str) -> Result<FailOutcome> {
        let job = self
            .storage
            .get_job(&lease.job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(lease.job_id.clone()))?;

        if job.state != JobState::Active {
            return Err(QueueError::WrongState {
                id: job.id,
                actual: job.state,
            });
        }

        let now = self.now();
        self.retire(&job, lease, reason, now, Some(now)).await
    }

    /// Treat every active job whose lease ran out at `now` as a failed attempt.
    pub async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut reaped = 0;

        loop {
            let expired = self.storage.expired_leases(now, REAP_BATCH).await?;
            let batch_len = expired.len();

            for claimed in expired {
                let reason = format!(
                    "LeaseExpired: worker {} did not report before {}",
                    claimed.lease.worker_id, claimed.lease.expires_at
                );
                match self
                    .retire(&claimed.job, &claimed.lease, &reason, now, None)
                    .await
                {
                    Ok(_) => reaped += 1,
                    // Worker reported just in time.
                    Err(QueueError::WrongState { .. } | QueueError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }

            if batch_len < REAP_BATCH as usize {
                break;
            }
        }

        if reaped > 0 {
            warn!(count = reaped, "Reaped jobs with expired leases");
        }
        Ok(reaped)
    }

    async fn retire(
        &self,
        job: &Job,
        lease: &Lease,
        reason: &str,
        now: DateTime<Utc>,
        live_at: Option<DateTime<Utc>>,
    ) -> Result<FailOutcome> {
        let attempts = job.attempts + 1;

        let (release, outcome) = if attempts < job.max_attempts {
            let due_at = after(now, self.retry.delay_for(attempts));
            (
                LeaseRelease {
                    state: JobState::Delayed,
                    due_at: Some(due_at),
                    last_error: Some(reason.to_string()),
                    at: now,
                    live_at,
                },
                FailOutcome::Retrying { due_at, attempts },
            )
        } else {
            (
                LeaseRelease {
                    state: JobState::Failed,
                    due_at: None,
                    last_error: Some(reason.to_string()),
                    at: now,
                    live_at,
                },
                FailOutcome::Failed { attempts },
            )
        };

        if !self.storage.release_lease(lease, &release).await? {
            return Err(self.lost_lease(&lease.job_id).await);
        }

        match outcome {
            FailOutcome::Retrying { due_at, attempts } => info!(
                job_id = %job.id,
                attempts,
                max_attempts = job.max_attempts,
                %due_at,
                error = reason,
                "Scheduling job for retry"
            ),
            FailOutcome::Failed { attempts } => warn!(
                job_id = %job.id,
                attempts,
                error = reason,
                "Job failed permanently"
            ),
        }
        Ok(outcome)
    }

    /// Explain why a lease-guarded update matched nothing.
    async fn lost_lease(&self, id: &JobId) -> QueueError {
        match self.storage.get_job(id).await {
            Ok(Some(job)) => {
                warn!(job_id = %id, state = %job.state, "Lease no longer held");
                QueueError::WrongState {
                    id: job.id,
                    actual: job.state,
                }
            }
            Ok(None) => QueueError::NotFound(id.clone()),
            Err(e) => e.into(),
        }
    }
}

fn validate_url(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| QueueError::InvalidInput(format!("Invalid webhook URL {url:?}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(QueueError::InvalidInput(format!(
            "Unsupported webhook URL scheme: {other}"
        ))),
    }
}

/// `now + d`, saturating at the latest storable instant.
fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    let latest = latest_ts();
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .map_or(latest, |t| t.min(latest))
}
