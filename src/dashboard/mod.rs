//! Read-only admin interface: HTML pages plus a small JSON API.
//!
//! Everything here goes through [`Inspector`], which has no mutating
//! operations, so the dashboard cannot change job state.

mod templates;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::error::QueueError;
use crate::inspect::Inspector;
use crate::job::{JobId, JobState};

const PAGE_SIZE: u32 = 100;

pub fn router(inspector: Inspector) -> Router {
    Router::new()
        .route("/", get(overview))
        .route("/jobs/{state}", get(jobs_page))
        .route("/job/{id}", get(job_page))
        .route("/api/stats", get(api_stats))
        .route("/api/jobs", get(api_jobs))
        .route("/api/jobs/{id}", get(api_job))
        .with_state(inspector)
}

#[derive(Debug, Deserialize)]
struct JobsQuery {
    state: JobState,
    limit: Option<u32>,
}

async fn overview(State(inspector): State<Inspector>) -> Response {
    match inspector.stats().await {
        Ok(stats) => Html(templates::render_overview(&stats)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn jobs_page(State(inspector): State<Inspector>, Path(state): Path<JobState>) -> Response {
    match inspector.jobs(state, PAGE_SIZE).await {
        Ok(jobs) => Html(templates::render_jobs(state, &jobs)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn job_page(State(inspector): State<Inspector>, Path(id): Path<String>) -> Response {
    match inspector.job(&JobId(id.clone())).await {
        Ok(job) => Html(templates::render_job(&job)).into_response(),
        Err(QueueError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, Html(templates::render_not_found(&id))).into_response()
        }
        Err(e) => store_error(e),
    }
}

async fn api_stats(State(inspector): State<Inspector>) -> Response {
    match inspector.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => store_error(e),
    }
}

async fn api_jobs(State(inspector): State<Inspector>, Query(query): Query<JobsQuery>) -> Response {
    let limit = query.limit.unwrap_or(PAGE_SIZE).min(1000);
    match inspector.jobs(query.state, limit).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => store_error(e),
    }
}

async fn api_job(State(inspector): State<Inspector>, Path(id): Path<String>) -> Response {
    match inspector.job(&JobId(id)).await {
        Ok(job) => Json(job).into_response(),
        Err(e @ QueueError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e) => store_error(e),
    }
}

fn store_error(e: QueueError) -> Response {
    error!(error = %e, "Dashboard query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Job store unavailable" })),
    )
        .into_response()
}
