#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;

use webhook_scheduler::{
    Job, JobId, JobQueue, QueueConfig, QueueEngine, RetryPolicy, SqliteStorage, SystemClock,
    HttpDispatcher,
};

#[derive(Clone, Default)]
struct HookState {
    received: Arc<Mutex<Vec<Value>>>,
    status: Arc<AtomicU16>,
    /// Number of upcoming requests that answer 500 before `status` applies.
    failures_left: Arc<AtomicUsize>,
}

/// Webhook target bound to an ephemeral port that records every body it gets.
pub struct MockWebhook {
    pub base_url: String,
    state: HookState,
    handle: tokio::task::JoinHandle<()>,
}

impl MockWebhook {
    pub async fn spawn() -> Self {
        let state = HookState::default();
        state.status.store(200, Ordering::SeqCst);

        let app = Router::new()
            .route("/hook", post(record))
            .route("/slow", post(slow))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/hook", self.base_url)
    }

    pub fn slow_url(&self) -> String {
        format!("{}/slow", self.base_url)
    }

    pub fn respond_with(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn fail_next(&self, n: usize) {
        self.state.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().unwrap().clone()
    }
}

impl Drop for MockWebhook {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn record(State(state): State<HookState>, Json(body): Json<Value>) -> (StatusCode, &'static str) {
    state.received.lock().unwrap().push(body);

    let failing = state
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "temporarily broken");
    }

    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap();
    (status, "ok")
}

async fn slow(State(state): State<HookState>, Json(body): Json<Value>) -> StatusCode {
    state.received.lock().unwrap().push(body);
    tokio::time::sleep(Duration::from_secs(5)).await;
    StatusCode::OK
}

/// Fast timings so scenarios settle within a second or two.
pub fn fast_config() -> QueueConfig {
    QueueConfig::new("sqlite::memory:")
        .with_poll_interval(Duration::from_millis(20))
        .with_worker_idle_backoff(Duration::from_millis(10))
        .with_lease_duration(Duration::from_secs(2))
        .with_dispatch_timeout(Duration::from_millis(500))
        .with_worker_count(2)
        .with_retry(RetryPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
        ))
}

/// A queue over a private in-memory store that delivers over real HTTP.
pub async fn queue_with(config: QueueConfig) -> JobQueue {
    let storage = SqliteStorage::in_memory().await.unwrap();
    JobQueue::with_parts(
        config,
        Arc::new(storage),
        Arc::new(SystemClock),
        Arc::new(HttpDispatcher::new().unwrap()),
    )
    .unwrap()
}

/// Poll until the job satisfies `done`, panicking after `within`.
pub async fn wait_for<F>(engine: &QueueEngine, id: &JobId, within: Duration, done: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    let inspector = engine.inspector();
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let job = inspector.job(id).await.unwrap();
        if done(&job) {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {id} did not settle in {within:?}; last seen: {job:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_terminal(engine: &QueueEngine, id: &JobId) -> Job {
    wait_for(engine, id, Duration::from_secs(5), |job| job.state.is_terminal()).await
}
