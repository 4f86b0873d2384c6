use axum::Router;

pub mod jobs;
pub mod queue;
pub mod system;
pub mod tasks;

/// Router for everything under `/api/v1`.
pub fn router() -> Router {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/jobs", jobs::router())
        .nest("/queue", queue::router())
}
