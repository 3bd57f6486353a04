use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("lease duration ({lease:?}) must exceed the dispatch timeout ({timeout:?})")]
    LeaseTooShort { lease: Duration, timeout: Duration },
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("default max attempts must be at least 1")]
    NoAttempts,
    #[error("scheduler poll interval must be non-zero")]
    ZeroPollInterval,
    #[error("invalid default webhook URL {0:?}")]
    BadWebhookUrl(String),
}

/// Everything the queue runtime needs to start.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// sqlx connection string for the job store.
    pub database_url: String,
    /// Where jobs without their own target URL are delivered.
    pub default_webhook_url: Option<String>,
    /// How often the scheduler promotes due jobs and reaps expired leases.
    pub poll_interval: Duration,
    /// How long an idle worker waits before polling again.
    pub worker_idle_backoff: Duration,
    pub default_max_attempts: u32,
    /// Must exceed `dispatch_timeout` so a live worker is never reaped.
    pub lease_duration: Duration,
    pub dispatch_timeout: Duration,
    pub worker_count: usize,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://jobs.db?mode=rwc".to_string(),
            default_webhook_url: None,
            poll_interval: Duration::from_secs(1),
            worker_idle_backoff: Duration::from_millis(500),
            default_max_attempts: 1,
            lease_duration: Duration::from_secs(60),
            dispatch_timeout: Duration::from_secs(30),
            worker_count: 2,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    pub fn with_default_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.default_webhook_url = Some(url.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_worker_idle_backoff(mut self, backoff: Duration) -> Self {
        self.worker_idle_backoff = backoff;
        self
    }

    pub fn with_default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts;
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_duration <= self.dispatch_timeout {
            return Err(ConfigError::LeaseTooShort {
                lease: self.lease_duration,
                timeout: self.dispatch_timeout,
            });
        }
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.default_max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if let Some(url) = &self.default_webhook_url {
            match reqwest::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => return Err(ConfigError::BadWebhookUrl(url.clone())),
            }
        }
        Ok(())
    }
}
