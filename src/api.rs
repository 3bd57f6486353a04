use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use crate::engine::QueueEngine;
use crate::error::QueueError;
use crate::job::{delay_from_ms, JobId, JobState, NewJob};

/// Body of `POST /job`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub execute_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delay_ms: Option<i64>,
    #[serde(default, alias = "webhook_url", alias = "targetUrl")]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl From<SubmitJobRequest> for NewJob {
    fn from(req: SubmitJobRequest) -> Self {
        NewJob {
            name: req.name.unwrap_or_else(|| "job".to_string()),
            payload: req.data,
            execute_at: req.execute_at,
            delay: req.delay_ms.map(delay_from_ms),
            target_url: req.webhook_url,
            max_attempts: req.max_attempts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub id: JobId,
    pub message: String,
    pub due_at: DateTime<Utc>,
    pub state: JobState,
}

pub fn router(engine: QueueEngine) -> Router {
    Router::new()
        .route("/job", post(submit_job))
        .route("/health", get(health))
        .with_state(engine)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn submit_job(
    State(engine): State<QueueEngine>,
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return json_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let name = req.name.clone().unwrap_or_default();
    match engine.enqueue(req.into()).await {
        Ok(job) => Json(SubmitJobResponse {
            id: job.id,
            message: "Job scheduled with success".to_string(),
            due_at: job.due_at,
            state: job.state,
        })
        .into_response(),
        Err(QueueError::InvalidInput(msg)) => json_error(StatusCode::BAD_REQUEST, msg),
        Err(e) => {
            error!(name = %name, error = %e, "Failed to schedule job");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to schedule job")
        }
    }
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}
