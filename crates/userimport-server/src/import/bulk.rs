//! Transactional bulk merge of validated users
//!
//! One chunk is one transaction: stage the rows, run two set-oriented upsert
//! passes (by external id, then by email), replace the affected users'
//! addresses wholesale, clean up the staging rows, commit. Two passes keep
//! each pass's conflict target unambiguous when a row carries both a valid
//! external id and an email that collides with a different user.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::jobs::ImportChunkResult;
use crate::models::user::{Address, User, UUID_PATTERN};

/// Rows per staging INSERT, sized against the Postgres bind-parameter limit.
const STAGE_USER_BATCH: usize = 1000;
const STAGE_ADDRESS_BATCH: usize = 500;

#[async_trait]
pub trait BulkImporter: Send + Sync {
    /// Merge one chunk of validated users into the canonical tables.
    async fn import_chunk(&self, job_id: Uuid, users: &[User]) -> Result<ImportChunkResult>;
}

pub struct PgBulkImporter {
    pool: PgPool,
}

impl PgBulkImporter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BulkImporter for PgBulkImporter {
    async fn import_chunk(&self, job_id: Uuid, users: &[User]) -> Result<ImportChunkResult> {
        if users.is_empty() {
            return Ok(ImportChunkResult::default());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin import chunk transaction")?;

        stage_users(&mut tx, job_id, users).await?;
        stage_addresses(&mut tx, job_id, users).await?;

        let (mut imported, mut updated) = upsert_users_by_external_id(&mut tx, job_id).await?;
        let (by_email_imported, by_email_updated) = upsert_users_by_email(&mut tx, job_id).await?;
        imported += by_email_imported;
        updated += by_email_updated;

        replace_addresses(&mut tx, job_id).await?;

        sqlx::query("DELETE FROM stg_addresses WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .context("cleanup stg_addresses")?;
        sqlx::query("DELETE FROM stg_users WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .context("cleanup stg_users")?;

        tx.commit().await.context("commit import chunk")?;

        Ok(ImportChunkResult {
            imported,
            updated,
            // row-level skips are decided upstream by validation
            skipped: 0,
        })
    }
}

async fn stage_users(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
    users: &[User],
) -> Result<()> {
    let rows: Vec<(i64, &User)> = users
        .iter()
        .enumerate()
        .map(|(i, user)| (i as i64, user))
        .collect();

    for chunk in rows.chunks(STAGE_USER_BATCH) {
        let mut query_builder = QueryBuilder::new(
            "INSERT INTO stg_users (job_id, row_index, external_id, name, email, phone_number) ",
        );
        query_builder.push_values(chunk, |mut b, (row_index, user)| {
            b.push_bind(job_id)
                .push_bind(*row_index)
                .push_bind(nullable_text(&user.id))
                .push_bind(&user.name)
                .push_bind(&user.email)
                .push_bind(&user.phone_number);
        });
        query_builder
            .build()
            .execute(&mut **tx)
            .await
            .context("stage users")?;
    }

    Ok(())
}

async fn stage_addresses(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
    users: &[User],
) -> Result<()> {
    let rows: Vec<(i64, i64, &User, &Address)> = users
        .iter()
        .enumerate()
        .flat_map(|(i, user)| {
            user.addresses
                .iter()
                .enumerate()
                .map(move |(seq, address)| (i as i64, seq as i64, user, address))
        })
        .collect();

    if rows.is_empty() {
        return Ok(());
    }

    for chunk in rows.chunks(STAGE_ADDRESS_BATCH) {
        let mut query_builder = QueryBuilder::new(
            "INSERT INTO stg_addresses (job_id, row_index, seq, user_external_id, user_email, \
             street, city, state, zip_code, country) ",
        );
        query_builder.push_values(chunk, |mut b, (row_index, seq, user, address)| {
            b.push_bind(job_id)
                .push_bind(*row_index)
                .push_bind(*seq)
                .push_bind(nullable_text(&user.id))
                .push_bind(&user.email)
                .push_bind(&address.street)
                .push_bind(&address.city)
                .push_bind(&address.state)
                .push_bind(&address.zip_code)
                .push_bind(&address.country);
        });
        query_builder
            .build()
            .execute(&mut **tx)
            .await
            .context("stage addresses")?;
    }

    Ok(())
}

/// Upsert staged rows whose external id matches the UUID pattern, keyed on
/// `users.id`. The last staged row per external id wins. `xmax = 0` marks
/// rows materialized by this statement, distinguishing inserts from updates.
async fn upsert_users_by_external_id(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
) -> Result<(i64, i64)> {
    let inserted_flags = sqlx::query_scalar::<_, bool>(
        r#"
WITH staged AS (
    SELECT DISTINCT ON (external_id)
      CASE WHEN external_id ~* $2 THEN external_id::uuid ELSE NULL END AS ext_uuid,
      name,
      email,
      phone_number
    FROM stg_users
    WHERE job_id = $1 AND external_id IS NOT NULL AND external_id <> ''
    ORDER BY external_id, row_index DESC
), upserted AS (
    INSERT INTO users (id, name, email, phone_number, created_at, updated_at)
    SELECT ext_uuid, name, email, phone_number, NOW(), NOW()
    FROM staged
    WHERE ext_uuid IS NOT NULL
    ON CONFLICT (id) DO UPDATE
      SET name = EXCLUDED.name,
          email = EXCLUDED.email,
          phone_number = EXCLUDED.phone_number,
          updated_at = NOW()
    RETURNING (xmax = 0) AS inserted
)
SELECT inserted FROM upserted
"#,
    )
    .bind(job_id)
    .bind(UUID_PATTERN)
    .fetch_all(&mut **tx)
    .await
    .context("upsert users by external id")?;

    Ok(count_inserted_updated(&inserted_flags))
}

/// Upsert staged rows without a usable external id, keyed on `users.email`.
/// Email is the identity here, so conflicts overwrite name and phone only.
async fn upsert_users_by_email(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
) -> Result<(i64, i64)> {
    let inserted_flags = sqlx::query_scalar::<_, bool>(
        r#"
WITH staged AS (
    SELECT DISTINCT ON (email)
      name,
      email,
      phone_number
    FROM stg_users
    WHERE job_id = $1 AND (external_id IS NULL OR external_id = '' OR NOT (external_id ~* $2))
    ORDER BY email, row_index DESC
), upserted AS (
    INSERT INTO users (name, email, phone_number, created_at, updated_at)
    SELECT name, email, phone_number, NOW(), NOW()
    FROM staged
    ON CONFLICT (email) DO UPDATE
      SET name = EXCLUDED.name,
          phone_number = EXCLUDED.phone_number,
          updated_at = NOW()
    RETURNING (xmax = 0) AS inserted
)
SELECT inserted FROM upserted
"#,
    )
    .bind(job_id)
    .bind(UUID_PATTERN)
    .fetch_all(&mut **tx)
    .await
    .context("upsert users by email")?;

    Ok(count_inserted_updated(&inserted_flags))
}

/// Delete every affected user's addresses, then insert the staged ones in
/// chunk order. Users are matched by external-id UUID or, failing that, email.
async fn replace_addresses(tx: &mut Transaction<'_, Postgres>, job_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
WITH affected_users AS (
    SELECT DISTINCT u.id
    FROM users u
    JOIN stg_users s
      ON s.job_id = $1
     AND (
       (CASE WHEN s.external_id ~* $2 THEN s.external_id::uuid ELSE NULL END) = u.id
       OR ((s.external_id IS NULL OR s.external_id = '' OR NOT (s.external_id ~* $2)) AND u.email = s.email)
     )
)
DELETE FROM addresses a
USING affected_users af
WHERE a.user_id = af.id
"#,
    )
    .bind(job_id)
    .bind(UUID_PATTERN)
    .execute(&mut **tx)
    .await
    .context("delete existing addresses")?;

    sqlx::query(
        r#"
INSERT INTO addresses (user_id, street, city, state, zip_code, country, created_at, updated_at)
SELECT
  u.id,
  a.street,
  a.city,
  a.state,
  a.zip_code,
  a.country,
  NOW(),
  NOW()
FROM stg_addresses a
JOIN users u
  ON (
    (CASE WHEN a.user_external_id ~* $2 THEN a.user_external_id::uuid ELSE NULL END) = u.id
    OR ((a.user_external_id IS NULL OR a.user_external_id = '' OR NOT (a.user_external_id ~* $2)) AND u.email = a.user_email)
  )
WHERE a.job_id = $1
ORDER BY a.row_index, a.seq
"#,
    )
    .bind(job_id)
    .bind(UUID_PATTERN)
    .execute(&mut **tx)
    .await
    .context("insert replacement addresses")?;

    Ok(())
}

fn count_inserted_updated(inserted_flags: &[bool]) -> (i64, i64) {
    let imported = inserted_flags.iter().filter(|&&inserted| inserted).count() as i64;
    let updated = inserted_flags.len() as i64 - imported;
    (imported, updated)
}

fn nullable_text(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
