//! Import job types and run counters

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on failure records kept per run. Failures past the cap still
/// increment the counters but are not recorded.
pub const MAX_STORED_FAILURES: usize = 100;

/// Lifecycle state of an import job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(s.to_string()),
        }
    }
}

/// A claimed import job as handed to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJob {
    pub id: Uuid,
    pub source_path: String,
    pub status: JobStatus,
    /// Attempts already spent, including the claim that produced this value.
    pub attempts: i32,
    pub max_attempts: i32,
}

/// Counter snapshot written to the job row mid-flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub processed: i64,
    pub imported: i64,
    pub updated: i64,
    pub skipped: i64,
    pub failed: i64,
}

/// One recorded row failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    pub row_index: i64,
    pub reason: String,
}

/// Counts returned by one bulk-import call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportChunkResult {
    pub imported: i64,
    pub updated: i64,
    pub skipped: i64,
}

/// Accumulated result of a single job run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub processed: i64,
    pub imported: i64,
    pub updated: i64,
    pub skipped: i64,
    pub failed: i64,
    pub failures: Vec<ImportFailure>,
}

impl ImportSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one bulk-import result into the running totals.
    pub fn record_chunk(&mut self, result: ImportChunkResult) {
        self.imported += result.imported;
        self.updated += result.updated;
        self.skipped += result.skipped;
    }

    /// Count one row that failed validation.
    ///
    /// Invalid rows are both `failed` (bad) and `skipped` (not imported);
    /// the two counters deliberately double-count.
    pub fn record_invalid_row(&mut self, row_index: i64, reason: impl Into<String>) {
        self.failed += 1;
        self.skipped += 1;
        if self.failures.len() < MAX_STORED_FAILURES {
            self.failures.push(ImportFailure {
                row_index,
                reason: reason.into(),
            });
        }
    }

    /// Current counters as a progress snapshot.
    pub fn progress(&self) -> ImportProgress {
        ImportProgress {
            processed: self.processed,
            imported: self.imported,
            updated: self.updated,
            skipped: self.skipped,
            failed: self.failed,
        }
    }
}
