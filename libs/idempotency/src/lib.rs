//! Consumer-side de-duplication on `event_id`.
//!
//! At-least-once delivery means the same envelope can reach a connection
//! twice: once from the original publish, once from a reprocessed DLQ entry,
//! or once after a reader crash between bus-accept and mark-processed. This
//! guard makes "process if new" durable across restarts by recording
//! `event_id`s that have already been handled in Postgres.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::future::Future;

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid event_id: {0}")]
    InvalidEventId(String),
    #[error("handler failed: {0}")]
    HandlerFailed(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResult {
    Success,
    AlreadyProcessed,
    Failed(String),
}

impl ProcessingResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProcessingResult::Success | ProcessingResult::AlreadyProcessed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProcessingResult::Failed(_))
    }
}

pub struct ProcessedEvent {
    pub event_id: String,
    pub processed_at: DateTime<Utc>,
}

pub struct IdempotencyGuard {
    pool: PgPool,
    retention: ChronoDuration,
}

impl IdempotencyGuard {
    pub fn new(pool: PgPool, retention: ChronoDuration) -> Self {
        Self { pool, retention }
    }

    pub async fn is_processed(&self, event_id: &str) -> Result<bool, IdempotencyError> {
        validate_event_id(event_id)?;
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Returns `true` if this call is the one that recorded the event
    /// (i.e. it was genuinely new).
    pub async fn mark_processed(&self, event_id: &str) -> Result<bool, IdempotencyError> {
        validate_event_id(event_id)?;
        let result = sqlx::query(
            "INSERT INTO processed_events (event_id, processed_at) VALUES ($1, now())
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Check-then-execute-then-mark. Not atomic against a concurrent
    /// duplicate delivery racing the same `event_id` on two workers, but the
    /// unique constraint in `mark_processed` guarantees at most one of them
    /// reports itself as the "new" processor; the other observes
    /// `AlreadyProcessed` via its own `is_processed` check on retry.
    pub async fn process_if_new<F, Fut>(
        &self,
        event_id: &str,
        f: F,
    ) -> Result<ProcessingResult, IdempotencyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), anyhow::Error>>,
    {
        if self.is_processed(event_id).await? {
            return Ok(ProcessingResult::AlreadyProcessed);
        }
        if let Err(e) = f().await {
            return Ok(ProcessingResult::Failed(e.to_string()));
        }
        self.mark_processed(event_id).await?;
        Ok(ProcessingResult::Success)
    }

    pub async fn cleanup_old_events(&self) -> Result<u64, IdempotencyError> {
        let cutoff = Utc::now() - self.retention;
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub fn validate_event_id(event_id: &str) -> Result<(), IdempotencyError> {
    if event_id.is_empty() {
        return Err(IdempotencyError::InvalidEventId("empty event_id".to_string()));
    }
    if event_id.len() > 255 {
        return Err(IdempotencyError::InvalidEventId(
            "event_id exceeds 255 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_event_id() {
        assert!(validate_event_id("").is_err());
    }

    #[test]
    fn rejects_oversized_event_id() {
        let long = "a".repeat(256);
        assert!(validate_event_id(&long).is_err());
    }

    #[test]
    fn accepts_normal_event_id() {
        assert!(validate_event_id("order_created-abc123").is_ok());
    }

    #[test]
    fn processing_result_helpers() {
        assert!(ProcessingResult::Success.is_ok());
        assert!(ProcessingResult::AlreadyProcessed.is_ok());
        assert!(ProcessingResult::Failed("x".into()).is_failed());
        assert!(!ProcessingResult::Success.is_failed());
    }
}
