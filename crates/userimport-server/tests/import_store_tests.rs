//! Job store integration tests against a real PostgreSQL server.
//!
//! Ignored by default. Each test gets its own database; point `DATABASE_URL`
//! at a server and run:
//!
//! ```sh
//! cargo test -p userimport-server -- --ignored
//! ```

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use userimport_server::import::jobs::{ImportProgress, ImportSummary, JobStatus};
use userimport_server::import::store::{JobStore, JobStoreError, PgJobStore};
use uuid::Uuid;

const LEASE: Duration = Duration::from_secs(60);

async fn job_status(pool: &PgPool, job_id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM import_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_one(pool)
        .await
        .expect("job row")
}

async fn lease_is_live(pool: &PgPool, job_id: Uuid) -> bool {
    sqlx::query_scalar(
        "SELECT lease_expires_at IS NOT NULL AND lease_expires_at > NOW() \
         FROM import_jobs WHERE id = $1",
    )
    .bind(job_id)
    .fetch_one(pool)
    .await
    .expect("job row")
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_enqueue_inserts_queued_job(pool: PgPool) {
    let store = PgJobStore::new(pool.clone());
    let job_id = store.enqueue("users.json").await.expect("enqueue");

    let (status, attempts, max_attempts): (String, i32, i32) = sqlx::query_as(
        "SELECT status, attempts, max_attempts FROM import_jobs WHERE id = $1",
    )
    .bind(job_id)
    .fetch_one(&pool)
    .await
    .expect("job row");

    assert_eq!(status, "queued");
    assert_eq!(attempts, 0);
    assert_eq!(max_attempts, 5);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_claim_transitions_job_to_running(pool: PgPool) {
    let store = PgJobStore::new(pool.clone());
    let job_id = store.enqueue("users.json").await.expect("enqueue");

    let job = store
        .claim_next(LEASE)
        .await
        .expect("claim")
        .expect("job available");

    assert_eq!(job.id, job_id);
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.source_path, "users.json");

    assert_eq!(job_status(&pool, job_id).await, "running");
    assert!(lease_is_live(&pool, job_id).await);

    let (lease_expires_at, started_at): (Option<DateTime<Utc>>, Option<DateTime<Utc>>) =
        sqlx::query_as("SELECT lease_expires_at, started_at FROM import_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(&pool)
            .await
            .expect("job row");
    assert!(lease_expires_at.expect("lease set") > Utc::now());
    assert!(started_at.is_some());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_claim_returns_none_on_empty_queue(pool: PgPool) {
    let store = PgJobStore::new(pool);
    assert!(store.claim_next(LEASE).await.expect("claim").is_none());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_concurrent_claims_are_exclusive(pool: PgPool) {
    let store_a = PgJobStore::new(pool.clone());
    let store_b = PgJobStore::new(pool.clone());
    store_a.enqueue("users.json").await.expect("enqueue");

    let (first, second) = tokio::join!(store_a.claim_next(LEASE), store_b.claim_next(LEASE));
    let first = first.expect("claim a");
    let second = second.expect("claim b");

    assert_eq!(
        first.is_some() as u8 + second.is_some() as u8,
        1,
        "exactly one claim must win"
    );
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_claim_prefers_oldest_job(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let older = store.enqueue("first.json").await.expect("enqueue");
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.enqueue("second.json").await.expect("enqueue");

    let job = store
        .claim_next(LEASE)
        .await
        .expect("claim")
        .expect("job available");
    assert_eq!(job.id, older);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_zero_lease_coerces_to_sixty_seconds(pool: PgPool) {
    let store = PgJobStore::new(pool.clone());
    let job_id = store.enqueue("users.json").await.expect("enqueue");

    store
        .claim_next(Duration::ZERO)
        .await
        .expect("claim")
        .expect("job available");

    let in_default_window: bool = sqlx::query_scalar(
        "SELECT lease_expires_at BETWEEN NOW() + INTERVAL '55 seconds' \
         AND NOW() + INTERVAL '65 seconds' FROM import_jobs WHERE id = $1",
    )
    .bind(job_id)
    .fetch_one(&pool)
    .await
    .expect("job row");
    assert!(in_default_window);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_expired_lease_allows_reclaim(pool: PgPool) {
    let store = PgJobStore::new(pool.clone());
    store.enqueue("users.json").await.expect("enqueue");

    let first = store
        .claim_next(Duration::from_secs(1))
        .await
        .expect("claim")
        .expect("job available");
    assert_eq!(first.attempts, 1);

    // nothing to steal while the lease is live
    assert!(store.claim_next(LEASE).await.expect("claim").is_none());

    tokio::time::sleep(Duration::from_millis(1300)).await;

    let second = store
        .claim_next(LEASE)
        .await
        .expect("claim")
        .expect("job reclaimable after lease expiry");
    assert_eq!(second.id, first.id);
    assert_eq!(second.attempts, 2);

    // once the reclaiming worker finishes, the original claimant's
    // heartbeat bounces off the terminal status
    store
        .complete(second.id, &ImportSummary::new())
        .await
        .expect("complete");
    assert!(matches!(
        store.heartbeat(first.id, LEASE).await,
        Err(JobStoreError::NotRunning)
    ));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_heartbeat_requires_running_status(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job_id = store.enqueue("users.json").await.expect("enqueue");

    assert!(matches!(
        store.heartbeat(job_id, LEASE).await,
        Err(JobStoreError::NotRunning)
    ));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_update_progress_writes_counters(pool: PgPool) {
    let store = PgJobStore::new(pool.clone());
    store.enqueue("users.json").await.expect("enqueue");
    let job = store
        .claim_next(LEASE)
        .await
        .expect("claim")
        .expect("job available");

    store
        .update_progress(
            job.id,
            ImportProgress {
                processed: 7,
                imported: 4,
                updated: 1,
                skipped: 2,
                failed: 2,
            },
        )
        .await
        .expect("update progress");

    let (processed, total, imported, updated, skipped, failed): (i64, i64, i64, i64, i64, i64) =
        sqlx::query_as(
            "SELECT progress_processed, progress_total, imported_count, updated_count, \
             skipped_count, failed_count FROM import_jobs WHERE id = $1",
        )
        .bind(job.id)
        .fetch_one(&pool)
        .await
        .expect("job row");

    assert_eq!(
        (processed, total, imported, updated, skipped, failed),
        (7, 7, 4, 1, 2, 2)
    );

    assert!(matches!(
        store.update_progress(Uuid::new_v4(), ImportProgress::default()).await,
        Err(JobStoreError::NotFound)
    ));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_complete_persists_summary_and_is_terminal(pool: PgPool) {
    let store = PgJobStore::new(pool.clone());
    store.enqueue("users.json").await.expect("enqueue");
    let job = store
        .claim_next(LEASE)
        .await
        .expect("claim")
        .expect("job available");

    let summary = ImportSummary {
        processed: 10,
        imported: 8,
        updated: 1,
        skipped: 1,
        failed: 1,
        failures: Vec::new(),
    };
    store.complete(job.id, &summary).await.expect("complete");

    assert_eq!(job_status(&pool, job.id).await, "succeeded");
    assert!(!lease_is_live(&pool, job.id).await);

    let (processed, imported, finished): (i64, i64, bool) = sqlx::query_as(
        "SELECT progress_processed, imported_count, finished_at IS NOT NULL \
         FROM import_jobs WHERE id = $1",
    )
    .bind(job.id)
    .fetch_one(&pool)
    .await
    .expect("job row");
    assert_eq!((processed, imported), (10, 8));
    assert!(finished);

    // terminal states are sticky: the job is no longer claimable
    assert!(store.claim_next(LEASE).await.expect("claim").is_none());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_requeue_preserves_attempts(pool: PgPool) {
    let store = PgJobStore::new(pool.clone());
    store.enqueue("users.json").await.expect("enqueue");
    let job = store
        .claim_next(LEASE)
        .await
        .expect("claim")
        .expect("job available");
    assert_eq!(job.attempts, 1);

    store
        .requeue(job.id, "decode user at index 3: boom")
        .await
        .expect("requeue");

    assert_eq!(job_status(&pool, job.id).await, "queued");
    assert!(!lease_is_live(&pool, job.id).await);

    let (attempts, error_message): (i32, Option<String>) =
        sqlx::query_as("SELECT attempts, error_message FROM import_jobs WHERE id = $1")
            .bind(job.id)
            .fetch_one(&pool)
            .await
            .expect("job row");
    assert_eq!(attempts, 1);
    assert_eq!(error_message.as_deref(), Some("decode user at index 3: boom"));

    // the next claim starts attempt two with a clean error slate
    let retry = store
        .claim_next(LEASE)
        .await
        .expect("claim")
        .expect("job available");
    assert_eq!(retry.attempts, 2);

    let error_message: Option<String> =
        sqlx::query_scalar("SELECT error_message FROM import_jobs WHERE id = $1")
            .bind(job.id)
            .fetch_one(&pool)
            .await
            .expect("job row");
    assert!(error_message.is_none());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_fail_is_terminal(pool: PgPool) {
    let store = PgJobStore::new(pool.clone());
    store.enqueue("users.json").await.expect("enqueue");
    let job = store
        .claim_next(LEASE)
        .await
        .expect("claim")
        .expect("job available");

    store.fail(job.id, "flush chunk: boom").await.expect("fail");

    assert_eq!(job_status(&pool, job.id).await, "failed");
    assert!(!lease_is_live(&pool, job.id).await);

    let finished: bool =
        sqlx::query_scalar("SELECT finished_at IS NOT NULL FROM import_jobs WHERE id = $1")
            .bind(job.id)
            .fetch_one(&pool)
            .await
            .expect("job row");
    assert!(finished);

    assert!(store.claim_next(LEASE).await.expect("claim").is_none());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_exhausted_attempts_are_not_claimable(pool: PgPool) {
    let store = PgJobStore::new(pool.clone());
    let job_id = store.enqueue("users.json").await.expect("enqueue");

    sqlx::query("UPDATE import_jobs SET attempts = max_attempts WHERE id = $1")
        .bind(job_id)
        .execute(&pool)
        .await
        .expect("exhaust attempts");

    assert!(store.claim_next(LEASE).await.expect("claim").is_none());
}
