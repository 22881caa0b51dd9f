//! Read-side user lookups

pub mod queries;
pub mod routes;

pub use routes::users_routes;
