//! Shared infrastructure for the user-import service.

pub mod logging;
