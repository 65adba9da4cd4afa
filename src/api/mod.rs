//! HTTP gateway: submission, status, metrics and health endpoints.
//!
//! A thin translation layer over the stores; all lifecycle semantics
//! live in the core. Endpoints:
//!
//! - `POST /submit` — validate, create the record, enqueue, count
//! - `GET /jobs/{id}` — status query by id
//! - `GET /metrics` — shared counters plus derived queue depth
//! - `GET /health` — store reachability

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::job::{Envelope, JobRecord, JobStatus};
use crate::store::{self, JobQueue, JobRecordStore, MetricsCounters, StoreError, Transitions};

/// Errors surfaced by the gateway endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Submission without a `task` field. Rejected before any mutation.
    #[error("Missing 'task' field")]
    MissingTask,

    /// Status query for an unknown (or expired) job id.
    #[error("Job not found")]
    JobNotFound,

    /// The shared store is unreachable; surfaced distinctly, never as
    /// zeroed-out data.
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingTask => StatusCode::BAD_REQUEST,
            ApiError::JobNotFound => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Shared state for the gateway routes.
#[derive(Clone)]
pub struct ApiState {
    pub records: JobRecordStore,
    pub queue: JobQueue,
    pub counters: MetricsCounters,
    pub transitions: Transitions,
    pub redis: ConnectionManager,
    pub job_ttl: Duration,
}

/// Body of `POST /submit`.
///
/// `task` is optional at the parse level so its absence maps to the 400
/// validation error rather than a generic body rejection.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub task: Option<String>,
}

/// Response of a successful submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: JobStatus,
    pub task: String,
    pub id: Uuid,
}

/// Response of `GET /jobs/{id}`.
///
/// Optional fields are present exactly when the record carries them:
/// `result`/`completed_at` for completed jobs, `error`/`failed_at` for
/// failed ones.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            task: record.task,
            attempts: record.attempts,
            created_at: record.created_at,
            result: record.result,
            completed_at: record.completed_at,
            error: record.error,
            failed_at: record.failed_at,
        }
    }
}

/// Response of `GET /metrics`.
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub queue_depth: usize,
}

/// POST /submit
///
/// Validates the payload, then runs the atomic submit transition:
/// record created with TTL, envelope enqueued, submitted counter
/// incremented.
async fn submit(
    State(state): State<ApiState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let task = request.task.ok_or(ApiError::MissingTask)?;

    let envelope = Envelope::new(Uuid::new_v4(), task.clone(), Utc::now());
    state.transitions.submit(&envelope, state.job_ttl).await?;

    info!(job_id = %envelope.id, "Job submitted");

    Ok(Json(SubmitResponse {
        status: JobStatus::Queued,
        task,
        id: envelope.id,
    }))
}

/// GET /jobs/{id}
async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    // Ids are always UUIDs; anything else simply does not exist
    let id: Uuid = id.parse().map_err(|_| ApiError::JobNotFound)?;

    match state.records.get(id).await? {
        Some(record) => Ok(Json(JobResponse::from(record))),
        None => Err(ApiError::JobNotFound),
    }
}

/// GET /metrics
///
/// Queue depth is derived from the queue itself on every call; it is
/// never tracked as a counter.
async fn metrics(State(state): State<ApiState>) -> Result<Json<MetricsResponse>, ApiError> {
    let snapshot = state.counters.snapshot().await?;
    let queue_depth = state.queue.depth().await?;

    Ok(Json(MetricsResponse {
        jobs_submitted: snapshot.jobs_submitted,
        jobs_completed: snapshot.jobs_completed,
        jobs_failed: snapshot.jobs_failed,
        queue_depth,
    }))
}

/// GET /health
async fn health(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    store::ping(&state.redis).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// Builds the gateway router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/submit", post(submit))
        .route("/jobs/{id}", get(get_job))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_task_is_bad_request() {
        let response = ApiError::MissingTask.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_status() {
        let response = ApiError::JobNotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unavailable_status() {
        let err = ApiError::Unavailable(StoreError::ConnectionFailed("refused".to_string()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_error_wire_messages() {
        assert_eq!(ApiError::MissingTask.to_string(), "Missing 'task' field");
        assert_eq!(ApiError::JobNotFound.to_string(), "Job not found");
    }

    #[test]
    fn test_submit_response_shape() {
        let response = SubmitResponse {
            status: JobStatus::Queued,
            task: "hello".to_string(),
            id: Uuid::new_v4(),
        };
        let value = serde_json::to_value(&response).expect("should serialize");

        assert_eq!(value["status"], "queued");
        assert_eq!(value["task"], "hello");
        assert_eq!(value["id"].as_str().map(str::len), Some(36));
    }

    #[test]
    fn test_submit_request_task_optional() {
        let request: SubmitRequest = serde_json::from_str("{}").expect("should parse");
        assert!(request.task.is_none());

        let request: SubmitRequest =
            serde_json::from_str(r#"{"task":"hello"}"#).expect("should parse");
        assert_eq!(request.task.as_deref(), Some("hello"));
    }

    #[test]
    fn test_submit_accepts_empty_task_string() {
        // Only absence of the field is a validation error; an empty
        // payload is passed through to the queue as-is
        let request: SubmitRequest = serde_json::from_str(r#"{"task":""}"#).expect("should parse");
        assert!(request.task.is_some());
        assert!(request.task.ok_or(ApiError::MissingTask).is_ok());
    }

    #[test]
    fn test_job_response_omits_absent_terminal_fields() {
        let record = JobRecord {
            id: Uuid::new_v4(),
            status: JobStatus::Completed,
            task: Some("hello".to_string()),
            attempts: 1,
            created_at: Some(Utc::now()),
            worker_id: Some("worker-0".to_string()),
            result: Some("Processed task: hello".to_string()),
            completed_at: Some(Utc::now()),
            error: None,
            failed_at: None,
        };

        let value = serde_json::to_value(JobResponse::from(record)).expect("should serialize");
        assert_eq!(value["status"], "completed");
        assert!(value.get("result").is_some());
        assert!(value.get("completed_at").is_some());
        assert!(value.get("error").is_none());
        assert!(value.get("failed_at").is_none());
    }

    #[test]
    fn test_metrics_response_shape() {
        let response = MetricsResponse {
            jobs_submitted: 5,
            jobs_completed: 3,
            jobs_failed: 1,
            queue_depth: 1,
        };
        let value = serde_json::to_value(&response).expect("should serialize");

        assert_eq!(value["jobs_submitted"], 5);
        assert_eq!(value["jobs_completed"], 3);
        assert_eq!(value["jobs_failed"], 1);
        assert_eq!(value["queue_depth"], 1);
    }
}
