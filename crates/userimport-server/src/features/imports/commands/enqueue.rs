//! Enqueue command
//!
//! Validates the requested source path and inserts a `queued` import job for
//! the worker pool to pick up.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::import::jobs::JobStatus;
use crate::import::store::{JobStore, JobStoreError, PgJobStore};

/// Command to enqueue an import of a JSON user export
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueImportCommand {
    #[serde(default)]
    pub source_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueImportResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueImportError {
    #[error("source_path must be a .json file")]
    InvalidSource,
    #[error("failed to enqueue import job: {0}")]
    Store(#[from] JobStoreError),
}

impl EnqueueImportCommand {
    /// The source must be a non-empty path ending (case-insensitively) in
    /// `.json`. Returns the trimmed path.
    pub fn validate(&self) -> Result<&str, EnqueueImportError> {
        let source_path = self.source_path.trim();
        if source_path.is_empty() || !source_path.to_ascii_lowercase().ends_with(".json") {
            return Err(EnqueueImportError::InvalidSource);
        }
        Ok(source_path)
    }
}

#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: PgPool,
    command: EnqueueImportCommand,
) -> Result<EnqueueImportResponse, EnqueueImportError> {
    let source_path = command.validate()?.to_string();

    let store = PgJobStore::new(pool);
    let job_id = store.enqueue(&source_path).await?;

    tracing::info!(job_id = %job_id, source_path = %source_path, "import job enqueued");

    Ok(EnqueueImportResponse {
        job_id,
        status: JobStatus::Queued,
    })
}
