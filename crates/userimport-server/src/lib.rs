//! User import service
//!
//! REST service that ingests large JSON user exports into PostgreSQL.
//!
//! # Overview
//!
//! - **API Endpoints**: enqueue import jobs and look up imported users
//! - **Import engine**: durable leased job queue, streaming JSON ingestion
//!   workers, and a transactional bulk merge with address replacement
//! - **Database Management**: PostgreSQL integration with SQLx
//! - **Configuration**: environment-based configuration management
//! - **Middleware**: request ids, body limits, panic recovery, CORS, tracing
//!
//! # Architecture
//!
//! HTTP features are vertical slices (`features::imports`, `features::users`)
//! that call their command/query handlers directly. The import engine
//! (`import`) runs beside the HTTP server: a bounded pool of workers claims
//! jobs from the Postgres-backed queue, streams the source file without
//! materializing it, and merges validated rows chunk-by-chunk inside single
//! transactions. At-least-once delivery with idempotent upserts; a lapsed
//! lease makes a crashed worker's job claimable again.

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod import;
pub mod middleware;
pub mod models;

pub use error::AppError;
