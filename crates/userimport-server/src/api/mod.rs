//! HTTP API composition

pub mod response;

use axum::{routing::get, Json, Router};
use serde_json::json;
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;

use crate::{config::Config, features, middleware};

/// Build the application router with the full middleware stack applied
pub fn router(db: PgPool, config: &Config) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/v1", features::router(db))
        // layers apply bottom-up: the last one wraps everything above it
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
        .layer(middleware::propagate_request_id_layer())
        .layer(middleware::set_request_id_layer())
        .layer(middleware::body_limit_layer())
        .layer(middleware::catch_panic_layer())
}

/// Liveness probe
async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
