//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, queue and job engine wiring
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request DTOs and the response envelope
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{build_services, AppServices};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", routes::router())
        .fallback(routes::system::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_logger))
                .layer(Extension(services)),
        )
}
