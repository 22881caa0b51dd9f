//! Import job enqueueing

pub mod commands;
pub mod routes;

pub use routes::imports_routes;
