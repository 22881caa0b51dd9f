//! Import worker pool
//!
//! Long-lived workers claim jobs from the store, stream the JSON payload,
//! validate rows, and flush chunks through the bulk importer while keeping
//! the job lease alive. Row validation failures stay row-local; every other
//! error aborts the attempt and routes through requeue/fail bookkeeping.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::bulk::BulkImporter;
use super::jobs::{ImportJob, ImportSummary};
use super::source::ImportSource;
use super::store::JobStore;
use super::stream::JsonArrayStream;
use crate::models::user::{Address, User, ValidationError};

/// Longest error reason persisted on a job row, in bytes.
const MAX_REASON_BYTES: usize = 1000;

/// Worker pool tuning. Zero values mean "use the default"; the pool never
/// runs more than ten workers.
#[derive(Debug, Clone)]
pub struct ImportWorkerConfig {
    pub workers: usize,
    pub chunk_size: usize,
    pub poll_interval: Duration,
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ImportWorkerConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            chunk_size: 10_000,
            poll_interval: Duration::from_millis(500),
            lease_duration: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl ImportWorkerConfig {
    fn normalized(mut self) -> Self {
        if self.workers == 0 {
            self.workers = 10;
        }
        self.workers = self.workers.min(10);
        if self.chunk_size == 0 {
            self.chunk_size = 10_000;
        }
        if self.poll_interval.is_zero() {
            self.poll_interval = Duration::from_millis(500);
        }
        if self.lease_duration.is_zero() {
            self.lease_duration = Duration::from_secs(60);
        }
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = self.lease_duration / 2;
        }
        self
    }
}

/// Marker error for a shutdown observed mid-job. The job's state is left
/// untouched; its lease lapses and a future worker reclaims it.
#[derive(Debug, thiserror::Error)]
#[error("import worker shutting down")]
struct ShutdownError;

pub struct ImportWorkerPool {
    store: Arc<dyn JobStore>,
    source: Arc<dyn ImportSource>,
    importer: Arc<dyn BulkImporter>,
    cfg: ImportWorkerConfig,
}

impl ImportWorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        source: Arc<dyn ImportSource>,
        importer: Arc<dyn BulkImporter>,
        cfg: ImportWorkerConfig,
    ) -> Self {
        Self {
            store,
            source,
            importer,
            cfg: cfg.normalized(),
        }
    }

    pub fn config(&self) -> &ImportWorkerConfig {
        &self.cfg
    }

    /// Spawn the worker tasks. They run until the token is cancelled.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.cfg.workers)
            .map(|worker| {
                let pool = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.worker_loop(worker, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize, shutdown: CancellationToken) {
        info!(worker, "import worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let job = match self.store.claim_next(self.cfg.lease_duration).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(worker, error = %e, "claim next import job failed");
                    if !sleep_unless_shutdown(&shutdown, self.cfg.poll_interval).await {
                        break;
                    }
                    continue;
                },
            };

            let Some(job) = job else {
                if !sleep_unless_shutdown(&shutdown, self.cfg.poll_interval).await {
                    break;
                }
                continue;
            };

            if let Err(e) = self.process_job(&job, &shutdown).await {
                warn!(worker, job_id = %job.id, error = ?e, "process import job failed");
            }
        }

        info!(worker, "import worker stopped");
    }

    /// Process one claimed job end to end.
    ///
    /// On failure the attempt is charged against the job (requeue while
    /// attempts remain, terminal fail otherwise) and the original error is
    /// returned. A shutdown observed mid-stream returns without touching the
    /// job at all.
    pub async fn process_job(
        &self,
        job: &ImportJob,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        match self.run_attempt(job, shutdown).await {
            Ok(()) => Ok(()),
            Err(err) if err.is::<ShutdownError>() => Err(err),
            Err(err) => Err(self.on_processing_error(job, err).await),
        }
    }

    async fn run_attempt(&self, job: &ImportJob, shutdown: &CancellationToken) -> Result<()> {
        let reader = self
            .source
            .open(&job.source_path)
            .await
            .context("open import source")?;

        let mut stream = JsonArrayStream::new(BufReader::new(reader));
        stream.begin().await.context("read json start token")?;

        let mut summary = ImportSummary::new();
        let mut chunk: Vec<User> = Vec::with_capacity(self.cfg.chunk_size.min(10_000));
        let mut last_heartbeat = Instant::now();
        let mut row_index: i64 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Err(anyhow!(ShutdownError));
            }

            if last_heartbeat.elapsed() >= self.cfg.heartbeat_interval {
                self.store
                    .heartbeat(job.id, self.cfg.lease_duration)
                    .await
                    .context("heartbeat")?;
                last_heartbeat = Instant::now();
            }

            let raw = match stream
                .next_element::<RawUser>()
                .await
                .with_context(|| format!("decode user at index {row_index}"))?
            {
                Some(raw) => raw,
                None => break,
            };

            summary.processed += 1;

            match raw.into_user() {
                Ok(user) => {
                    chunk.push(user);
                    if chunk.len() >= self.cfg.chunk_size {
                        self.flush_chunk(job.id, &mut chunk, &mut summary).await?;
                        self.store
                            .heartbeat(job.id, self.cfg.lease_duration)
                            .await
                            .context("heartbeat after flush")?;
                        last_heartbeat = Instant::now();
                    }
                },
                Err(validation_err) => {
                    summary.record_invalid_row(row_index, validation_err.to_string());
                },
            }

            row_index += 1;
        }

        self.flush_chunk(job.id, &mut chunk, &mut summary).await?;

        self.store
            .update_progress(job.id, summary.progress())
            .await
            .context("update final progress")?;

        self.store
            .complete(job.id, &summary)
            .await
            .context("complete job")?;

        Ok(())
    }

    async fn flush_chunk(
        &self,
        job_id: Uuid,
        chunk: &mut Vec<User>,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let result = self
            .importer
            .import_chunk(job_id, chunk)
            .await
            .context("flush chunk")?;
        summary.record_chunk(result);

        self.store
            .update_progress(job_id, summary.progress())
            .await
            .context("update progress")?;

        chunk.clear();
        Ok(())
    }

    /// Charge the failed attempt against the job.
    ///
    /// `attempts` was already incremented by the claim, so equality with
    /// `max_attempts` means no retries are left.
    async fn on_processing_error(&self, job: &ImportJob, err: anyhow::Error) -> anyhow::Error {
        let reason = truncate_reason(&format!("{err:#}"));

        if job.attempts < job.max_attempts {
            if let Err(requeue_err) = self.store.requeue(job.id, &reason).await {
                return err.context(format!("requeue failed: {requeue_err}"));
            }
            return err;
        }

        if let Err(fail_err) = self.store.fail(job.id, &reason).await {
            return err.context(format!("fail update failed: {fail_err}"));
        }
        err
    }
}

/// Sleep for `duration`, returning false if shutdown fired first.
async fn sleep_unless_shutdown(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Trim and cap a failure reason at [`MAX_REASON_BYTES`] without splitting a
/// character.
fn truncate_reason(reason: &str) -> String {
    let reason = reason.trim();
    if reason.len() <= MAX_REASON_BYTES {
        return reason.to_string();
    }
    let mut end = MAX_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[derive(Debug, Deserialize)]
struct RawAddress {
    #[serde(default)]
    street: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    zip_code: String,
    #[serde(default)]
    country: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    phone_number: String,
    #[serde(default)]
    addresses: Vec<RawAddress>,
}

impl RawUser {
    fn into_user(self) -> Result<User, ValidationError> {
        let addresses = self
            .addresses
            .into_iter()
            .map(|address| Address {
                street: address.street,
                city: address.city,
                state: address.state,
                zip_code: address.zip_code,
                country: address.country,
            })
            .collect();

        User::new(self.id, self.name, self.email, self.phone_number, addresses)
    }
}
