use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use webhook_scheduler::{telemetry, JobQueue, QueueConfig, RetryPolicy};

#[derive(Parser, Debug)]
#[command(name = "webhook-scheduler")]
#[command(version)]
#[command(about = "Delayed job queue that delivers payloads to HTTP webhooks")]
struct Args {
    /// Job store connection string
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://jobs.db?mode=rwc")]
    database_url: String,

    /// Webhook used for jobs submitted without their own URL
    #[arg(long, env = "JOBS_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Port for the submission API and admin dashboard
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Scheduler poll interval in milliseconds
    #[arg(long, env = "SCHEDULER_POLL_MS", default_value = "1000")]
    poll_ms: u64,

    /// Attempts per job when the submission does not say
    #[arg(long, env = "DEFAULT_MAX_ATTEMPTS", default_value = "1")]
    max_attempts: u32,

    /// Worker lease in milliseconds; must exceed the dispatch timeout
    #[arg(long, env = "LEASE_MS", default_value = "60000")]
    lease_ms: u64,

    /// Webhook call timeout in milliseconds
    #[arg(long, env = "DISPATCH_TIMEOUT_MS", default_value = "30000")]
    dispatch_timeout_ms: u64,

    /// Number of concurrent delivery workers
    #[arg(long, env = "WORKER_COUNT", default_value = "2")]
    workers: usize,

    /// Base retry backoff in milliseconds
    #[arg(long, env = "RETRY_BASE_MS", default_value = "1000")]
    retry_base_ms: u64,

    /// Longest retry backoff in milliseconds
    #[arg(long, env = "RETRY_MAX_MS", default_value = "3600000")]
    retry_max_ms: u64,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn queue_config(&self) -> QueueConfig {
        let mut config = QueueConfig::new(&self.database_url)
            .with_poll_interval(Duration::from_millis(self.poll_ms))
            .with_default_max_attempts(self.max_attempts)
            .with_lease_duration(Duration::from_millis(self.lease_ms))
            .with_dispatch_timeout(Duration::from_millis(self.dispatch_timeout_ms))
            .with_worker_count(self.workers)
            .with_retry(RetryPolicy::new(
                Duration::from_millis(self.retry_base_ms),
                Duration::from_millis(self.retry_max_ms),
            ));
        if let Some(url) = self.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            config = config.with_default_webhook_url(url);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.log_json);

    let mut queue = JobQueue::new(args.queue_config())
        .await
        .context("failed to start job queue")?;
    queue.start();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to bind port {}", args.port))?;

    info!(
        webhook_url = args.webhook_url.as_deref().unwrap_or("(none)"),
        "Jobs webhook url"
    );
    info!(port = args.port, "API is running");

    let app = queue.router();
    let token = queue.shutdown_token();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    });

    queue.wait_for_shutdown().await?;
    server.await??;
    Ok(())
}
