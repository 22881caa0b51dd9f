//! Server-wide error type
//!
//! `AppError` is the boundary between feature errors and HTTP. Database and
//! internal failures are logged here and surfaced with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ErrorResponse;

/// Application error types mapped onto the HTTP envelope
#[derive(Error, Debug)]
pub enum AppError {
    #[error("source_path must be a .json file")]
    InvalidSource,

    #[error("id must be a valid UUID")]
    InvalidUserId,

    #[error("user not found")]
    UserNotFound,

    #[error("invalid request body")]
    BadRequest,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::InvalidSource => (
                StatusCode::BAD_REQUEST,
                "invalid_source",
                "source_path must be a .json file".to_string(),
            ),
            AppError::InvalidUserId => (
                StatusCode::BAD_REQUEST,
                "invalid_user_id",
                "id must be a valid UUID".to_string(),
            ),
            AppError::UserNotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "user not found".to_string(),
            ),
            AppError::BadRequest => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                "invalid request body".to_string(),
            ),
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "a database error occurred".to_string(),
                )
            },
            AppError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            },
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}
