use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::engine::{FailOutcome, QueueEngine};
use crate::error::QueueError;
use crate::job::ClaimedJob;

const MAX_STORE_BACKOFF: Duration = Duration::from_secs(30);
const REPORT_ATTEMPTS: u32 = 3;

/// Per-worker knobs, copied out of the queue config.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub lease_duration: Duration,
    pub dispatch_timeout: Duration,
    pub idle_backoff: Duration,
    pub default_webhook_url: Option<String>,
}

/// Runs the claim, dispatch, report cycle against the queue engine.
pub struct Worker {
    id: String,
    engine: QueueEngine,
    dispatcher: Arc<dyn Dispatcher>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        engine: QueueEngine,
        dispatcher: Arc<dyn Dispatcher>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id: id.into(),
            engine,
            dispatcher,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until shutdown is signaled. A dispatch already in flight is
    /// finished and reported before the worker exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, "Worker started");
        let mut store_backoff = self.settings.idle_backoff;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let pause = match self.poll_and_process().await {
                Ok(true) => {
                    store_backoff = self.settings.idle_backoff;
                    continue;
                }
                Ok(false) => {
                    store_backoff = self.settings.idle_backoff;
                    self.settings.idle_backoff
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Queue store unavailable");
                    let pause = store_backoff;
                    store_backoff = (store_backoff * 2).min(MAX_STORE_BACKOFF);
                    pause
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(worker_id = %self.id, "Worker shutting down");
    }

    /// Claim and process at most one job. Returns whether a job was found.
    pub async fn poll_and_process(&self) -> Result<bool, QueueError> {
        let Some(claimed) = self
            .engine
            .claim(&self.id, self.settings.lease_duration)
            .await?
        else {
            return Ok(false);
        };

        debug!(worker_id = %self.id, job_id = %claimed.id, name = %claimed.name, "Processing job");

        let result = self.dispatch(&claimed).await;
        self.report(&claimed, result).await?;
        Ok(true)
    }

    async fn dispatch(&self, claimed: &ClaimedJob) -> Result<(), DispatchError> {
        // A per-job override is fixed at enqueue time and never re-resolved.
        let url = claimed
            .target_url
            .as_deref()
            .or(self.settings.default_webhook_url.as_deref())
            .ok_or(DispatchError::NoTarget)?;

        let timeout = self.settings.dispatch_timeout;
        tokio::select! {
            res = self.dispatcher.send(url, &claimed.payload, timeout) => res,
            _ = tokio::time::sleep(timeout) => Err(DispatchError::Timeout(timeout)),
        }
    }

    /// Hand the outcome back to the engine, retrying while the store is down.
    async fn report(
        &self,
        claimed: &ClaimedJob,
        result: Result<(), DispatchError>,
    ) -> Result<(), QueueError> {
        let mut pause = self.settings.idle_backoff;
        let mut tries = 0;

        loop {
            tries += 1;
            let reported = match &result {
                Ok(()) => self.engine.acknowledge(&claimed.lease).await.map(|()| {
                    info!(worker_id = %self.id, job_id = %claimed.id, "Job delivered");
                }),
                Err(e) => self
                    .engine
                    .fail(&claimed.lease, &e.to_string())
                    .await
                    .map(|outcome| self.log_failure(claimed, e, outcome)),
            };

            match reported {
                Ok(()) => return Ok(()),
                Err(e @ (QueueError::WrongState { .. } | QueueError::NotFound(_))) => {
                    // Lease was reaped while we were dispatching; whoever owns
                    // the job now decides its fate.
                    warn!(worker_id = %self.id, job_id = %claimed.id, error = %e, "Dropping result for lost lease");
                    return Ok(());
                }
                Err(e) if e.is_transient() && tries < REPORT_ATTEMPTS => {
                    warn!(worker_id = %self.id, job_id = %claimed.id, error = %e, "Failed to report job result, retrying");
                    tokio::time::sleep(pause).await;
                    pause = (pause * 2).min(MAX_STORE_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn log_failure(&self, claimed: &ClaimedJob, error: &DispatchError, outcome: FailOutcome) {
        match outcome {
            FailOutcome::Retrying { due_at, attempts } => warn!(
                worker_id = %self.id,
                job_id = %claimed.id,
                attempts,
                %due_at,
                error = %error,
                "Failed to send job to webhook"
            ),
            FailOutcome::Failed { attempts } => error!(
                worker_id = %self.id,
                job_id = %claimed.id,
                attempts,
                error = %error,
                "Failed to send job to webhook, giving up"
            ),
        }
    }
}
