use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, QueueConfig};
use crate::dispatcher::{Dispatcher, HttpDispatcher};
use crate::engine::QueueEngine;
use crate::scheduler::Scheduler;
use crate::storage::{SqliteStorage, Storage, StorageError};
use crate::worker::{Worker, WorkerSettings};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to open job store: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Owns the worker pool and the scheduler, and exposes the HTTP surface.
pub struct JobQueue {
    engine: QueueEngine,
    dispatcher: Arc<dyn Dispatcher>,
    config: QueueConfig,
    shutdown: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
    scheduler_handle: Option<JoinHandle<()>>,
}

impl JobQueue {
    /// Open the SQLite store named in `config` and deliver over HTTP.
    ///
    /// Workers are not started until you call `start()`.
    ///
    /// # Example
    /// ```ignore
    /// let config = QueueConfig::new("sqlite://jobs.db?mode=rwc")
    ///     .with_default_webhook_url("http://localhost:4000/jobs");
    /// let mut queue = JobQueue::new(config).await?;
    /// queue.start();
    /// ```
    pub async fn new(config: QueueConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let storage = SqliteStorage::new(&config.database_url).await?;
        let dispatcher = HttpDispatcher::new()?;

        Ok(Self::with_parts(
            config,
            Arc::new(storage),
            Arc::new(SystemClock),
            Arc::new(dispatcher),
        )?)
    }

    /// Assemble a queue from explicit parts, e.g. an in-memory store and a
    /// stub dispatcher.
    pub fn with_parts(
        config: QueueConfig,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let engine = QueueEngine::new(storage, clock)
            .with_retry_policy(config.retry)
            .with_default_max_attempts(config.default_max_attempts);

        Ok(Self {
            engine,
            dispatcher,
            config,
            shutdown: CancellationToken::new(),
            worker_handles: Vec::new(),
            scheduler_handle: None,
        })
    }

    pub fn engine(&self) -> &QueueEngine {
        &self.engine
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Spawn the configured number of workers plus the scheduler.
    /// Calling it again is a no-op.
    pub fn start(&mut self) {
        if self.scheduler_handle.is_some() {
            return;
        }

        for index in 0..self.config.worker_count {
            self.spawn_worker(index);
        }
        self.start_scheduler();
    }

    fn spawn_worker(&mut self, index: usize) {
        let settings = WorkerSettings {
            lease_duration: self.config.lease_duration,
            dispatch_timeout: self.config.dispatch_timeout,
            idle_backoff: self.config.worker_idle_backoff,
            default_webhook_url: self.config.default_webhook_url.clone(),
        };
        let worker = Worker::new(
            format!("worker-{}-{}", std::process::id(), index),
            self.engine.clone(),
            Arc::clone(&self.dispatcher),
            settings,
        );

        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            worker.run(shutdown).await;
        });

        self.worker_handles.push(handle);
    }

    fn start_scheduler(&mut self) {
        let scheduler = Scheduler::new(self.engine.clone(), self.config.poll_interval);
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            scheduler.run(shutdown).await;
        });

        self.scheduler_handle = Some(handle);
    }

    /// Submission API at the root plus the read-only dashboard under `/admin`.
    pub fn router(&self) -> axum::Router {
        crate::api::router(self.engine.clone())
            .nest("/admin", crate::dashboard::router(self.engine.inspector()))
    }

    /// Stop every task and wait for in-flight deliveries to be reported.
    pub async fn shutdown(&mut self) {
        info!("Shutting down...");
        self.shutdown.cancel();

        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }

        if let Some(handle) = self.scheduler_handle.take() {
            let _ = handle.await;
        }

        info!("Shutdown complete");
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn wait_for_shutdown(&mut self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await?;
        self.shutdown().await;
        Ok(())
    }
}
