//! Postgres-backed outbox.
//!
//! ## Claiming
//!
//! `claim_due` is a single statement: a `FOR UPDATE SKIP LOCKED` sub-select
//! picks the batch and the enclosing `UPDATE` flips it to `processing`. Rows
//! locked by a concurrent claimer are skipped rather than waited on, so two
//! overlapping runs split the due set instead of sharing it. Reclaimed stuck
//! rows have the lost attempt added to `retry_count`.
//!
//! ## Fencing
//!
//! Every later write filters on `status = 'processing' AND processed_at = $claim`.
//! Zero affected rows means the claim is gone: either the row does not exist
//! (`NotFound`) or someone else owns it now (`StaleClaim`).
//!
//! ## Error Mapping
//!
//! | SQLx Error | OutboxStoreError |
//! |------------|------------------|
//! | Database (check violation `23514`) | `Validation` |
//! | Database (other) | `Storage` |
//! | PoolClosed / Io / Tls / other | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Row};
use tracing::{instrument, warn};
use uuid::Uuid;

use leasehold_core::OutboxEventId;
use leasehold_events::{ClaimToken, EventStatus, NewOutboxEvent, OutboxEvent, CLAIM_EXPIRED};

use super::store::{OutboxStats, OutboxStore, OutboxStoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_outbox_events.sql");

const COLUMNS: &str = "id, event_type, payload, status, scheduled_at, retry_count, \
                       max_retries, error_message, processed_at, created_at";

/// Postgres outbox store. Cheap to clone; shares the pool.
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: Arc<PgPool>,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `outbox_events` table and its indexes if missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), OutboxStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Explain a zero-row fenced update.
    async fn claim_lost(&self, id: OutboxEventId) -> OutboxStoreError {
        let exists = sqlx::query("SELECT 1 FROM outbox_events WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await;

        match exists {
            Ok(Some(_)) => OutboxStoreError::StaleClaim(id),
            Ok(None) => OutboxStoreError::NotFound(id),
            Err(e) => map_sqlx_error("claim_lost", e),
        }
    }

    /// Run a fenced update and translate "no rows" into the right error.
    async fn fenced(
        &self,
        operation: &str,
        claim: &ClaimToken,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<(), OutboxStoreError> {
        let result = query
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        if result.rows_affected() == 0 {
            return Err(self.claim_lost(claim.id).await);
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self, event), fields(event_type = %event.event_type), err)]
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent, OutboxStoreError> {
        event.validate()?;
        let event = event.into_event(Utc::now());

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO outbox_events (
                id, event_type, payload, status, scheduled_at, retry_count, max_retries, created_at
            )
            VALUES ($1, $2, $3, 'pending', $4, 0, $5, $6)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(event.id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.scheduled_at)
        .bind(event.max_retries.map(to_db_count))
        .bind(event.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        decode_row(&row)
    }

    #[instrument(skip(self), fields(event_id = %id), err)]
    async fn get(&self, id: OutboxEventId) -> Result<Option<OutboxEvent>, OutboxStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM outbox_events WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(decode_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM outbox_events
            WHERE status = 'pending' AND scheduled_at <= $1
            ORDER BY scheduled_at ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(to_db_limit(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("select_due", e))?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        stuck_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        let rows = sqlx::query(
            r#"
            WITH candidates AS (
                SELECT id, status AS prior_status
                FROM outbox_events
                WHERE (status = 'pending' AND scheduled_at <= $1)
                   OR ($3::timestamptz IS NOT NULL
                       AND status = 'processing'
                       AND processed_at <= $3)
                ORDER BY scheduled_at ASC, id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_events AS e
            SET status = 'processing',
                processed_at = $1,
                retry_count = CASE WHEN e.status = 'processing'
                                   THEN e.retry_count + 1 ELSE e.retry_count END,
                error_message = CASE WHEN e.status = 'processing'
                                     THEN $4 ELSE e.error_message END
            FROM candidates
            WHERE e.id = candidates.id
            RETURNING e.id, e.event_type, e.payload, e.status, e.scheduled_at, e.retry_count,
                      e.max_retries, e.error_message, e.processed_at, e.created_at,
                      candidates.prior_status
            "#,
        )
        .bind(now)
        .bind(to_db_limit(limit))
        .bind(stuck_before)
        .bind(CLAIM_EXPIRED)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_due", e))?;

        let reclaimed = rows
            .iter()
            .filter(|row| {
                row.try_get::<String, _>("prior_status")
                    .is_ok_and(|status| status == EventStatus::Processing.as_str())
            })
            .count();
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed stuck outbox events");
        }

        let mut claimed = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        // RETURNING order is unspecified.
        claimed.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        Ok(claimed)
    }

    #[instrument(skip(self), fields(event_id = %claim.id), err)]
    async fn mark_completed(&self, claim: &ClaimToken) -> Result<(), OutboxStoreError> {
        let query = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'completed'
            WHERE id = $1 AND status = 'processing' AND processed_at = $2
            "#,
        )
        .bind(claim.id.as_uuid())
        .bind(claim.claimed_at);

        self.fenced("mark_completed", claim, query).await
    }

    #[instrument(skip(self, error), fields(event_id = %claim.id), err)]
    async fn reschedule(
        &self,
        claim: &ClaimToken,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), OutboxStoreError> {
        let query = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending', retry_count = $3, scheduled_at = $4, error_message = $5
            WHERE id = $1 AND status = 'processing' AND processed_at = $2
            "#,
        )
        .bind(claim.id.as_uuid())
        .bind(claim.claimed_at)
        .bind(to_db_count(retry_count))
        .bind(next_attempt_at)
        .bind(error);

        self.fenced("reschedule", claim, query).await
    }

    #[instrument(skip(self, error), fields(event_id = %claim.id), err)]
    async fn mark_failed(
        &self,
        claim: &ClaimToken,
        retry_count: u32,
        error: &str,
    ) -> Result<(), OutboxStoreError> {
        let query = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'failed', retry_count = $3, error_message = $4
            WHERE id = $1 AND status = 'processing' AND processed_at = $2
            "#,
        )
        .bind(claim.id.as_uuid())
        .bind(claim.claimed_at)
        .bind(to_db_count(retry_count))
        .bind(error);

        self.fenced("mark_failed", claim, query).await
    }

    #[instrument(skip(self), fields(event_id = %claim.id), err)]
    async fn release(&self, claim: &ClaimToken) -> Result<(), OutboxStoreError> {
        let query = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'pending'
            WHERE id = $1 AND status = 'processing' AND processed_at = $2
            "#,
        )
        .bind(claim.id.as_uuid())
        .bind(claim.claimed_at);

        self.fenced("release", claim, query).await
    }

    #[instrument(skip(self), err)]
    async fn list_by_status(
        &self,
        status: Option<EventStatus>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM outbox_events
            WHERE $1::text IS NULL OR status = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(to_db_limit(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_status", e))?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM outbox_events GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = OutboxStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("stats", e))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| map_sqlx_error("stats", e))?;
            stats.record(parse_status(&status)?, count.max(0) as usize);
        }
        Ok(stats)
    }
}

fn to_db_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn to_db_count(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

fn parse_status(raw: &str) -> Result<EventStatus, OutboxStoreError> {
    raw.parse()
        .map_err(|_| OutboxStoreError::Storage(format!("unknown status in outbox_events: {raw}")))
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<OutboxEvent, OutboxStoreError> {
    OutboxEventRow::from_row(row)
        .map_err(|e| OutboxStoreError::Storage(format!("failed to decode outbox row: {e}")))?
        .try_into()
}

/// Map SQLx errors to OutboxStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23514") => OutboxStoreError::Validation(msg),
                _ => OutboxStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            OutboxStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => OutboxStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug, Clone, PartialEq)]
struct OutboxEventRow {
    id: Uuid,
    event_type: String,
    payload: JsonValue,
    status: String,
    scheduled_at: DateTime<Utc>,
    retry_count: i32,
    max_retries: Option<i32>,
    error_message: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for OutboxEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxEventRow {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            scheduled_at: row.try_get("scheduled_at")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            error_message: row.try_get("error_message")?,
            processed_at: row.try_get("processed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<OutboxEventRow> for OutboxEvent {
    type Error = OutboxStoreError;

    fn try_from(row: OutboxEventRow) -> Result<Self, Self::Error> {
        Ok(OutboxEvent {
            id: OutboxEventId::from_uuid(row.id),
            event_type: row.event_type,
            payload: row.payload,
            status: parse_status(&row.status)?,
            scheduled_at: row.scheduled_at,
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.map(|m| m.max(1) as u32),
            error_message: row.error_message,
            processed_at: row.processed_at,
            created_at: row.created_at,
        })
    }
}
