use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_schema::EventEnvelope;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{OutboxError, OutboxResult};
use crate::model::OutboxRow;

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Inserts exactly one outbox row inside the caller's transaction. The
    /// transaction boundary is enforced by the type system: callers must
    /// already hold a live `Transaction` to call this.
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: &EventEnvelope,
    ) -> OutboxResult<()>;

    /// Claims up to `batch_size` unprocessed, unlocked (or expired-lock)
    /// rows ordered by `id`, using `FOR UPDATE SKIP LOCKED` so concurrent
    /// workers never claim the same row.
    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: i64,
        visibility_timeout: chrono::Duration,
    ) -> OutboxResult<Vec<OutboxRow>>;

    async fn mark_processed(&self, id: i64) -> OutboxResult<()>;

    /// Increments `attempts`, records `last_error`, clears the worker lock
    /// but leaves `locked_until` set to the next eligible retry time so the
    /// row is not immediately reclaimed before backoff elapses.
    async fn mark_failed(
        &self,
        id: i64,
        error: &str,
        retry_not_before: DateTime<Utc>,
    ) -> OutboxResult<()>;

    /// Marks the row processed with a permanent-failure tag after it has
    /// been moved to the DLQ.
    async fn mark_dead_lettered(&self, id: i64) -> OutboxResult<()>;

    async fn pending_stats(&self) -> OutboxResult<(i64, i64)>;

    async fn replay_since(&self, since: DateTime<Utc>) -> OutboxResult<u64>;

    async fn replay_range(&self, from_event_id: Uuid, to_event_id: Uuid) -> OutboxResult<u64>;

    /// Deletes processed rows older than `retention`, matching the stream
    /// bus's own trim window.
    async fn sweep_processed(&self, retention: chrono::Duration) -> OutboxResult<u64>;
}

pub struct SqlxOutboxRepository {
    pool: PgPool,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: &EventEnvelope,
    ) -> OutboxResult<()> {
        let metadata = OutboxRow::metadata_from_envelope(envelope);
        let result = sqlx::query(
            r#"
            INSERT INTO outbox_events
                (event_id, event_type, tenant_id, aggregate_id, payload, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            "#,
        )
        .bind(envelope.event_id)
        .bind(&envelope.event_type)
        .bind(&envelope.tenant_id)
        .bind(&envelope.aggregate_id)
        .bind(&envelope.payload)
        .bind(&metadata)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(OutboxError::DuplicateEvent(envelope.event_id))
            }
            Err(e) => Err(OutboxError::Database(e)),
        }
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: i64,
        visibility_timeout: chrono::Duration,
    ) -> OutboxResult<Vec<OutboxRow>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            UPDATE outbox_events
            SET locked_by = $1,
                locked_until = now() + $2::interval
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE processed_at IS NULL
                  AND (locked_until IS NULL OR locked_until < now())
                ORDER BY id ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(visibility_timeout)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_processed(&self, id: i64) -> OutboxResult<()> {
        sqlx::query(
            "UPDATE outbox_events SET processed_at = now(), locked_by = NULL, locked_until = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: i64,
        error: &str,
        retry_not_before: DateTime<Utc>,
    ) -> OutboxResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET attempts = attempts + 1,
                last_error = $2,
                locked_by = NULL,
                locked_until = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(retry_not_before)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_dead_lettered(&self, id: i64) -> OutboxResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed_at = now(),
                dead_lettered_at = now(),
                locked_by = NULL,
                locked_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        let row: (i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                count(*)::bigint,
                extract(epoch FROM (now() - min(created_at)))::bigint
            FROM outbox_events
            WHERE processed_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((row.0, row.1.unwrap_or(0)))
    }

    async fn replay_since(&self, since: DateTime<Utc>) -> OutboxResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed_at = NULL, attempts = 0, last_error = NULL,
                locked_by = NULL, locked_until = NULL, dead_lettered_at = NULL
            WHERE created_at >= $1
            "#,
        )
        .bind(since)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn replay_range(&self, from_event_id: Uuid, to_event_id: Uuid) -> OutboxResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed_at = NULL, attempts = 0, last_error = NULL,
                locked_by = NULL, locked_until = NULL, dead_lettered_at = NULL
            WHERE id BETWEEN
                (SELECT id FROM outbox_events WHERE event_id = $1)
                AND (SELECT id FROM outbox_events WHERE event_id = $2)
            "#,
        )
        .bind(from_event_id)
        .bind(to_event_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn sweep_processed(&self, retention: chrono::Duration) -> OutboxResult<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE processed_at IS NOT NULL AND processed_at < now() - $1::interval",
        )
        .bind(retention)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
