use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Path, Query},
    http::StatusCode,
    routing::{delete, get},
    Router,
};

use taskforge_core::JobId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_jobs))
        .route("/:job_id", delete(remove_job))
        .route("/:job_id/status", get(job_status))
}

pub async fn job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match errors::parse_id(&job_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.queue().status(job_id) {
        Ok(status) => dto::ok(StatusCode::OK, "Job status retrieved successfully", status),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn remove_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match errors::parse_id(&job_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.queue().remove(job_id) {
        Ok(status) => dto::ok(StatusCode::OK, "Job removed successfully", status),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    params: Result<Query<dto::ListJobsParams>, QueryRejection>,
) -> axum::response::Response {
    let Query(params) = match params {
        Ok(p) => p,
        Err(e) => return errors::query_rejection(e),
    };
    let state = match params.state() {
        Ok(s) => s,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.queue().list(state, params.limit()) {
        Ok(jobs) => dto::ok(StatusCode::OK, "Jobs retrieved successfully", jobs),
        Err(e) => errors::queue_error_to_response(e),
    }
}
