use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use taskforge_core::Clock;

use crate::app::errors;
use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "timestamp": services.clock().now(),
        "uptime": services.uptime_secs(),
        "environment": services.environment(),
    }))
}

pub async fn not_found() -> axum::response::Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", "Route not found")
}
