use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use taskforge_core::TaskId;
use taskforge_infra::jobs::{JobKind, Payload};
use taskforge_tasks::{NewTask, TaskPatch, TaskStatus};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_task).get(list_tasks))
        .route("/status/:status", get(list_tasks_by_status))
        .route(
            "/:id",
            get(get_task)
                .put(update_task)
                .patch(update_task)
                .delete(delete_task),
        )
        .route("/:id/schedule", post(schedule_job))
}

pub async fn create_task(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<NewTask>, JsonRejection>,
) -> axum::response::Response {
    let Json(draft) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    match services.create_task(draft) {
        Ok(task) => dto::ok(StatusCode::CREATED, "Task created successfully", task),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn list_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    params: Result<Query<dto::ListTasksParams>, QueryRejection>,
) -> axum::response::Response {
    list(&services, params, None)
}

pub async fn list_tasks_by_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(status): Path<String>,
    params: Result<Query<dto::ListTasksParams>, QueryRejection>,
) -> axum::response::Response {
    let status: TaskStatus = match status.parse() {
        Ok(s) => s,
        Err(e) => return errors::domain_error_to_response(e),
    };
    list(&services, params, Some(status))
}

fn list(
    services: &AppServices,
    params: Result<Query<dto::ListTasksParams>, QueryRejection>,
    status: Option<TaskStatus>,
) -> axum::response::Response {
    let Query(params) = match params {
        Ok(p) => p,
        Err(e) => return errors::query_rejection(e),
    };

    let page = match params
        .to_query(status)
        .and_then(|query| services.list_tasks(&query))
    {
        Ok(page) => page,
        Err(e) => return errors::domain_error_to_response(e),
    };

    dto::paginated("Tasks retrieved successfully", page.tasks, page.pagination)
}

pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TaskId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.get_task(id) {
        Ok(task) => dto::ok(StatusCode::OK, "Task retrieved successfully", task),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn update_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<TaskPatch>, JsonRejection>,
) -> axum::response::Response {
    let id: TaskId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(patch) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };

    match services.update_task(id, patch) {
        Ok(task) => dto::ok(StatusCode::OK, "Task updated successfully", task),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn delete_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TaskId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.delete_task(id) {
        Ok(()) => dto::ok(StatusCode::OK, "Task deleted successfully", serde_json::Value::Null),
        Err(e) => errors::domain_error_to_response(e),
    }
}

pub async fn schedule_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::ScheduleJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let task_id: TaskId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_rejection(e),
    };
    let kind: JobKind = match body.job_type.parse() {
        Ok(k) => k,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let options = body.options();
    let payload = body.data.unwrap_or_else(Payload::new);
    match services.queue().schedule(task_id, kind, options, payload) {
        Ok(job) => dto::ok(StatusCode::CREATED, "Job scheduled successfully", job),
        Err(e) => errors::queue_error_to_response(e),
    }
}
