use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::QueueEngine;

/// Periodically promotes due jobs and reclaims jobs from crashed workers.
///
/// A failed tick loses nothing: due jobs stay in the delayed index until a
/// later tick promotes them.
pub struct Scheduler {
    engine: QueueEngine,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(engine: QueueEngine, poll_interval: Duration) -> Self {
        Self {
            engine,
            poll_interval,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(poll_interval = ?self.poll_interval, "Scheduler started");

        loop {
            self.tick().await;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    pub async fn tick(&self) {
        let now = self.engine.now();

        match self.engine.reap_expired_leases(now).await {
            Ok(0) => {}
            Ok(n) => debug!(count = n, "Reclaimed expired leases"),
            Err(e) => error!(error = %e, "Failed to reap expired leases"),
        }

        if let Err(e) = self.engine.promote_due(now).await {
            error!(error = %e, "Failed to promote due jobs");
        }
    }
}
