// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Job orchestrator HTTP surface: submits one-shot batch jobs via
//! [`trac_joborch::JobSupervisor`] and exposes a small admin API for polling
//! job status, fetching results, and inspecting the job cache. The cache's
//! concurrent map is in-process only (per its own design), so this is the
//! one place a separate process like `trac-cli` can reach it, over plain
//! HTTP rather than a shared address space.

use axum::{
    extract::{Path as AxPath, State},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json_};
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;
use trac_error::{ErrorCode, TracError};
use trac_executor::LocalExecutor;
use trac_jobcache::{QueryRow, SharedJobCache};
use trac_joborch::{BatchJobState, JobHeader, JobSupervisor};
use trac_queue::{JobPriority, SubmitQueue};
use trac_validate::validate_cache_key;

/// Upper bound on batch jobs admitted but not yet deleted, enforced by
/// [`AppState::admission`]. A burst of submissions beyond this is rejected
/// rather than silently queued, since this orchestrator has no background
/// dispatcher to drain a backlog.
const MAX_CONCURRENT_JOBS: usize = 256;

/// Shared state reachable from every handler. Job tracking itself lives in
/// the ticketed job cache behind `supervisor`, not in any state here — this
/// only adds the admission queue and a read-only handle onto the same cache
/// for the `/cache/{key}` inspection endpoint.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<JobSupervisor<LocalExecutor>>,
    pub admission: Arc<Mutex<SubmitQueue>>,
    pub cache: SharedJobCache,
}

impl AppState {
    #[must_use]
    pub fn new(supervisor: JobSupervisor<LocalExecutor>, cache: SharedJobCache) -> Self {
        Self {
            supervisor: Arc::new(supervisor),
            admission: Arc::new(Mutex::new(SubmitQueue::new(MAX_CONCURRENT_JOBS))),
            cache,
        }
    }
}

/// Wraps a [`TracError`] for Axum's `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(TracError);

impl From<TracError> for ApiError {
    fn from(err: TracError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.code.http_status();
        let body = Json(json!({
            "code": self.0.code.code(),
            "message": self.0.message,
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_key: String,
    pub job_config: Json_,
    pub sys_config: Json_,
    pub executable: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub batch_key: String,
}

/// Assemble the orchestrator's admin HTTP router.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(submit_job))
        .route("/jobs/{batch_key}/status", get(job_status))
        .route("/jobs/{batch_key}/result", get(job_result))
        .route("/jobs/{batch_key}", delete(delete_job_handler))
        .route("/cache/{key}", get(cache_get))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "time": Utc::now().to_rfc3339() }))
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    validate_cache_key(&req.job_key).map_err(ApiError)?;

    {
        let mut admission = state.admission.lock().unwrap_or_else(|e| e.into_inner());
        admission
            .enqueue(req.job_key.clone(), req.job_key.clone(), JobPriority::Normal)
            .map_err(|e| ApiError(TracError::new(ErrorCode::TemporaryFailure, e.to_string())))?;
    }

    let header = JobHeader {
        job_key: req.job_key.clone(),
        job_config: req.job_config,
        sys_config: req.sys_config,
        executable: req.executable,
    };
    let job = match state.supervisor.submit_one_shot(&header).await {
        Ok(job) => job,
        Err(err) => {
            state.admission.lock().unwrap_or_else(|e| e.into_inner()).remove(&req.job_key);
            return Err(err.into());
        }
    };
    Ok(Json(SubmitJobResponse { batch_key: job.batch_key }))
}

async fn delete_job_handler(
    State(state): State<Arc<AppState>>,
    AxPath(batch_key): AxPath<String>,
) -> Result<axum::http::StatusCode, ApiError> {
    let job = lookup_job(&state, &batch_key)?;
    let job_key = job.batch_key.strip_prefix("job-").unwrap_or(&job.batch_key).to_string();
    state.supervisor.delete_job(job, false).await?;
    state.admission.lock().unwrap_or_else(|e| e.into_inner()).remove(&job_key);
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    AxPath(batch_key): AxPath<String>,
) -> Result<Json<Json_>, ApiError> {
    let job = lookup_job(&state, &batch_key)?;
    let status = state.supervisor.poll_status(&job, None).await?;
    Ok(Json(json!({ "batch_key": batch_key, "status": status })))
}

async fn job_result(
    State(state): State<Arc<AppState>>,
    AxPath(batch_key): AxPath<String>,
) -> Result<Json<Json_>, ApiError> {
    let job = lookup_job(&state, &batch_key)?;
    let result = state.supervisor.get_result(&job, None).await?;
    Ok(Json(result))
}

fn lookup_job(state: &AppState, batch_key: &str) -> Result<BatchJobState, ApiError> {
    state.supervisor.lookup(batch_key).map_err(ApiError)
}

async fn cache_get(State(state): State<Arc<AppState>>, AxPath(key): AxPath<String>) -> Response {
    match state.cache.query_key(&key, Utc::now()) {
        Some(QueryRow::Ok(entry)) => Json(entry).into_response(),
        Some(QueryRow::Error(err)) => {
            (axum::http::StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "key": err.key, "error": err.error })))
                .into_response()
        }
        None => (axum::http::StatusCode::NOT_FOUND, Json(json!({ "message": "no such cache entry" }))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trac_jobcache::JobCache;

    fn empty_state() -> Arc<AppState> {
        let cache = Arc::new(JobCache::new());
        let supervisor = JobSupervisor::new(LocalExecutor::new(std::env::temp_dir()), cache.clone());
        Arc::new(AppState::new(supervisor, cache))
    }

    #[tokio::test]
    async fn cache_get_reports_missing_key_as_404() {
        let state = empty_state();
        let response = cache_get(State(state), AxPath("nope".to_string())).await;
        assert_eq!(response.into_response().status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn job_status_reports_missing_job_as_not_found() {
        let state = empty_state();
        let err = job_status(State(state), AxPath("job-missing".to_string())).await.unwrap_err();
        assert_eq!(err.0.code, trac_error::ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn delete_job_reports_missing_job_as_not_found() {
        let state = empty_state();
        let err = delete_job_handler(State(state), AxPath("job-missing".to_string())).await.unwrap_err();
        assert_eq!(err.0.code, trac_error::ErrorCode::NotFound);
    }

    #[test]
    fn admission_queue_rejects_past_capacity() {
        let mut queue = SubmitQueue::new(1);
        queue.enqueue("a".to_string(), "a".to_string(), JobPriority::Normal).unwrap();
        let err = queue.enqueue("b".to_string(), "b".to_string(), JobPriority::Normal).unwrap_err();
        assert!(matches!(err, trac_queue::QueueError::Full { max: 1 }));
    }

    fn submit_request(job_key: &str) -> SubmitJobRequest {
        SubmitJobRequest {
            job_key: job_key.to_string(),
            job_config: json!({}),
            sys_config: json!({}),
            executable: "trac-runtime".to_string(),
        }
    }

    #[tokio::test]
    async fn submit_job_rejects_invalid_job_key() {
        let state = empty_state();
        let err = submit_job(State(state), Json(submit_request("bad/key"))).await.unwrap_err();
        assert_eq!(err.0.code, trac_error::ErrorCode::Validation);
    }

    #[tokio::test]
    async fn submit_job_then_status_round_trips_through_the_cache() {
        let state = empty_state();
        let response = submit_job(State(state.clone()), Json(submit_request("roundtrip"))).await.unwrap();
        let status = job_status(State(state), AxPath(response.0.batch_key)).await.unwrap();
        assert_eq!(status.0["status"], json!("submitted"));
    }

    #[tokio::test]
    async fn concurrent_submit_for_same_job_key_is_rejected() {
        let state = empty_state();
        submit_job(State(state.clone()), Json(submit_request("racer"))).await.unwrap();
        let err = submit_job(State(state), Json(submit_request("racer"))).await.unwrap_err();
        assert_eq!(err.0.code, trac_error::ErrorCode::CacheDuplicate);
    }
}
