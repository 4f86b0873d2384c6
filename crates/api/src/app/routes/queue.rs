use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, routing::get, Router};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/stats", get(queue_stats))
}

pub async fn queue_stats(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.queue().stats() {
        Ok(stats) => dto::ok(StatusCode::OK, "Queue stats retrieved successfully", stats),
        Err(e) => errors::queue_error_to_response(e),
    }
}
