//! Durable import job queue backed by Postgres
//!
//! Jobs are claimed with a lease: one CTE statement atomically flips the
//! oldest eligible row to `running` and stamps `lease_expires_at`, so at most
//! one worker holds an unexpired lease per job. A crashed worker's job
//! becomes claimable again once its lease lapses, until attempts run out.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::jobs::{ImportJob, ImportProgress, ImportSummary};

/// Non-positive lease durations coerce to this many seconds.
const DEFAULT_LEASE_SECS: f64 = 60.0;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("import job is not running")]
    NotRunning,

    #[error("import job not found")]
    NotFound,

    #[error("unknown job status: {0}")]
    UnknownStatus(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence contract for the import job queue.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `queued` and return its id.
    async fn enqueue(&self, source_path: &str) -> Result<Uuid, JobStoreError>;

    /// Atomically claim the oldest eligible job, or `None` when the queue is
    /// drained.
    async fn claim_next(&self, lease: Duration) -> Result<Option<ImportJob>, JobStoreError>;

    /// Extend the lease of a running job.
    async fn heartbeat(&self, job_id: Uuid, lease: Duration) -> Result<(), JobStoreError>;

    /// Overwrite the job's progress counters (status-agnostic).
    async fn update_progress(
        &self,
        job_id: Uuid,
        progress: ImportProgress,
    ) -> Result<(), JobStoreError>;

    /// Transition to terminal `succeeded` with final counters.
    async fn complete(&self, job_id: Uuid, summary: &ImportSummary) -> Result<(), JobStoreError>;

    /// Return the job to `queued` for a later attempt.
    async fn requeue(&self, job_id: Uuid, reason: &str) -> Result<(), JobStoreError>;

    /// Transition to terminal `failed`.
    async fn fail(&self, job_id: Uuid, reason: &str) -> Result<(), JobStoreError>;
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ClaimedJobRow {
    id: Uuid,
    source_path: String,
    status: String,
    attempts: i32,
    max_attempts: i32,
}

impl ClaimedJobRow {
    fn into_job(self) -> Result<ImportJob, JobStoreError> {
        let status = self
            .status
            .parse()
            .map_err(JobStoreError::UnknownStatus)?;
        Ok(ImportJob {
            id: self.id,
            source_path: self.source_path,
            status,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
        })
    }
}

fn lease_seconds(lease: Duration) -> f64 {
    let secs = lease.as_secs_f64();
    if secs <= 0.0 {
        DEFAULT_LEASE_SECS
    } else {
        secs
    }
}

const CLAIM_NEXT_SQL: &str = r#"
WITH candidate AS (
    SELECT id
    FROM import_jobs
    WHERE
      (status = 'queued' OR (status = 'running' AND lease_expires_at < NOW()))
      AND attempts < max_attempts
    ORDER BY created_at
    FOR UPDATE SKIP LOCKED
    LIMIT 1
)
UPDATE import_jobs j
SET
    status = 'running',
    attempts = j.attempts + 1,
    started_at = COALESCE(j.started_at, NOW()),
    heartbeat_at = NOW(),
    lease_expires_at = NOW() + make_interval(secs => $1),
    error_message = NULL,
    updated_at = NOW()
FROM candidate
WHERE j.id = candidate.id
RETURNING j.id, j.source_path, j.status, j.attempts, j.max_attempts
"#;

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, source_path: &str) -> Result<Uuid, JobStoreError> {
        let job_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO import_jobs (source_path, status) VALUES ($1, 'queued') RETURNING id",
        )
        .bind(source_path)
        .fetch_one(&self.pool)
        .await?;

        Ok(job_id)
    }

    async fn claim_next(&self, lease: Duration) -> Result<Option<ImportJob>, JobStoreError> {
        let row = sqlx::query_as::<_, ClaimedJobRow>(CLAIM_NEXT_SQL)
            .bind(lease_seconds(lease))
            .fetch_optional(&self.pool)
            .await?;

        row.map(ClaimedJobRow::into_job).transpose()
    }

    async fn heartbeat(&self, job_id: Uuid, lease: Duration) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET
              heartbeat_at = NOW(),
              lease_expires_at = NOW() + make_interval(secs => $1),
              updated_at = NOW()
            WHERE id = $2 AND status = 'running'
            "#,
        )
        .bind(lease_seconds(lease))
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotRunning);
        }
        Ok(())
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        progress: ImportProgress,
    ) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET
              progress_processed = $1,
              progress_total = $1,
              imported_count = $2,
              updated_count = $3,
              skipped_count = $4,
              failed_count = $5,
              updated_at = NOW()
            WHERE id = $6
            "#,
        )
        .bind(progress.processed)
        .bind(progress.imported)
        .bind(progress.updated)
        .bind(progress.skipped)
        .bind(progress.failed)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound);
        }
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, summary: &ImportSummary) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET
              status = 'succeeded',
              progress_processed = $1,
              progress_total = $1,
              imported_count = $2,
              updated_count = $3,
              skipped_count = $4,
              failed_count = $5,
              error_message = NULL,
              lease_expires_at = NULL,
              heartbeat_at = NOW(),
              finished_at = NOW(),
              updated_at = NOW()
            WHERE id = $6
            "#,
        )
        .bind(summary.processed)
        .bind(summary.imported)
        .bind(summary.updated)
        .bind(summary.skipped)
        .bind(summary.failed)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound);
        }
        Ok(())
    }

    async fn requeue(&self, job_id: Uuid, reason: &str) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET
              status = 'queued',
              lease_expires_at = NULL,
              heartbeat_at = NOW(),
              error_message = $1,
              updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(reason)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound);
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, reason: &str) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET
              status = 'failed',
              lease_expires_at = NULL,
              heartbeat_at = NOW(),
              error_message = $1,
              finished_at = NOW(),
              updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(reason)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound);
        }
        Ok(())
    }
}
