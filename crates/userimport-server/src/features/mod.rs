//! Feature modules implementing the user-import API
//!
//! Each feature is a vertical slice with its own commands/queries and routes:
//!
//! - **imports**: enqueue import jobs for JSON user exports
//! - **users**: read-side lookup of imported users

pub mod imports;
pub mod users;

use axum::Router;
use sqlx::PgPool;

/// Creates the `/api/v1` router with all feature routes mounted
pub fn router(db: PgPool) -> Router {
    Router::new()
        .nest("/imports", imports::imports_routes().with_state(db.clone()))
        .nest("/users", users::users_routes().with_state(db))
}
