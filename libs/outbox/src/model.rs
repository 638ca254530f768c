use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Relational shape of the outbox table (§3). `locked_by`/`locked_until`
/// implement the claim mechanism described in §6: `SELECT ... FOR UPDATE
/// SKIP LOCKED`, with a visibility-timeout fallback so a crashed worker's
/// claim eventually expires and another worker can re-claim the row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub tenant_id: String,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    /// Envelope fields that the row schema does not break out into their own
    /// columns (`producer`, `trace_id`, `user_id`, `schema_version`) —
    /// mirrors the teacher's own `OutboxEvent.metadata` column rather than
    /// losing them.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    /// Set when the row's event was moved to the DLQ after exhausting
    /// `max_attempts`, rather than successfully published. Not named in the
    /// base row description but needed to carry the "permanent-failure tag"
    /// §4.2 step 5 calls for without overloading `last_error`.
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

impl OutboxRow {
    /// Reassembles the original envelope from the row's split-out columns
    /// plus the metadata sidecar.
    pub fn to_envelope(&self) -> event_schema::EventEnvelope {
        let schema_version = self
            .metadata
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(1) as u32;
        let producer = self
            .metadata
            .get("producer")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let mut envelope = event_schema::EventEnvelope::new(
            self.event_type.clone(),
            schema_version,
            self.tenant_id.clone(),
            self.aggregate_id.clone(),
            producer,
            self.payload.clone(),
        );
        envelope.event_id = self.event_id;
        envelope.occurred_at = self
            .metadata
            .get("occurred_at")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(self.created_at);
        envelope.trace_id = self
            .metadata
            .get("trace_id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        envelope.user_id = self
            .metadata
            .get("user_id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        envelope
    }

    pub fn metadata_from_envelope(envelope: &event_schema::EventEnvelope) -> serde_json::Value {
        serde_json::json!({
            "schema_version": envelope.schema_version,
            "producer": envelope.producer,
            "trace_id": envelope.trace_id,
            "user_id": envelope.user_id,
            // The envelope's producer-wall-clock timestamp, kept distinct
            // from the row's own `created_at` (set at insert time by the
            // database, not by the caller) so pending-age alerting and the
            // retention sweep measure insertion time, not producer time.
            "occurred_at": envelope.occurred_at.to_rfc3339(),
        })
    }
}
