//! Import routes

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use sqlx::PgPool;

use super::commands::enqueue::{handle as handle_enqueue, EnqueueImportCommand, EnqueueImportError};
use crate::api::response::ApiResponse;
use crate::error::AppError;

/// Create import routes
pub fn imports_routes() -> Router<PgPool> {
    Router::new().route("/users", post(start_import))
}

/// Enqueue an import job for a JSON user export
///
/// POST /api/v1/imports/users
async fn start_import(
    State(db): State<PgPool>,
    payload: Option<Json<EnqueueImportCommand>>,
) -> Result<Response, AppError> {
    let Some(Json(command)) = payload else {
        return Err(AppError::BadRequest);
    };

    match handle_enqueue(db, command).await {
        Ok(out) => Ok((StatusCode::ACCEPTED, Json(ApiResponse::new(out))).into_response()),
        Err(EnqueueImportError::InvalidSource) => Err(AppError::InvalidSource),
        Err(EnqueueImportError::Store(e)) => {
            tracing::error!(error = %e, "failed to enqueue import job");
            Err(AppError::Internal("failed to enqueue import job".to_string()))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_imports_routes_build() {
        let _router = imports_routes();
    }
}
