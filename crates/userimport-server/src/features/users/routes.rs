//! User routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use sqlx::PgPool;

use super::queries::get_user::{handle as handle_get_user, GetUserError, GetUserQuery};
use crate::api::response::ApiResponse;
use crate::error::AppError;

/// Create user routes
pub fn users_routes() -> Router<PgPool> {
    Router::new().route("/:id", get(get_user))
}

/// Get a user aggregate by id
///
/// GET /api/v1/users/:id
async fn get_user(
    State(db): State<PgPool>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    match handle_get_user(db, GetUserQuery { id }).await {
        Ok(user) => Ok((StatusCode::OK, Json(ApiResponse::new(user))).into_response()),
        Err(GetUserError::InvalidId) => Err(AppError::InvalidUserId),
        Err(GetUserError::NotFound) => Err(AppError::UserNotFound),
        Err(GetUserError::Database(e)) => {
            tracing::error!(error = %e, "failed to get user");
            Err(AppError::Internal("failed to get user".to_string()))
        },
    }
}
