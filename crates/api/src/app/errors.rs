use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use taskforge_core::DomainError;
use taskforge_infra::jobs::{JobStoreError, QueueError};

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        e @ DomainError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", e.to_string()),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
    }
}

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::TaskNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "Task not found")
        }
        QueueError::JobNotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "Job not found"),
        QueueError::InvalidSchedule(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_schedule", msg)
        }
        QueueError::Task(e) => domain_error_to_response(e),
        QueueError::Store(e @ JobStoreError::Conflict { .. }) => {
            json_error(StatusCode::CONFLICT, "conflict", e.to_string())
        }
        QueueError::Store(JobStoreError::NotFound(_)) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "Job not found")
        }
        QueueError::Store(e) => {
            tracing::error!(error = %e, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn json_rejection(err: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_body", err.body_text())
}

pub fn query_rejection(err: QueryRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_query", err.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id, answering 400 on malformed input.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(domain_error_to_response)
}
