use std::sync::Arc;

use event_schema::{EventEnvelope, SchemaRegistry};
use sqlx::{Postgres, Transaction};

use crate::error::OutboxResult;
use crate::repository::OutboxRepository;

/// Appends an event row inside the caller's transaction (§4.1). Co-locating
/// the insert with the business write is the only way to guarantee the
/// event is produced iff the business change commits.
pub struct OutboxWriter<R: OutboxRepository> {
    repository: Arc<R>,
    schemas: Arc<SchemaRegistry>,
}

impl<R: OutboxRepository> OutboxWriter<R> {
    pub fn new(repository: Arc<R>, schemas: Arc<SchemaRegistry>) -> Self {
        Self { repository, schemas }
    }

    /// Validates the envelope against its registered schema, then performs
    /// exactly one insert of the outbox row on the supplied transaction. No
    /// side effects outside the transaction.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: &EventEnvelope,
    ) -> OutboxResult<()> {
        self.schemas
            .validate(&envelope.event_type, envelope.schema_version, &envelope.payload)?;
        self.repository.insert(tx, envelope).await
    }
}
