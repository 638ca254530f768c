//! Thin abstraction over a log-structured stream with consumer groups,
//! per-consumer acknowledgement, pending-entry inspection and trimming
//! (§4.3). This is the only crate aware of the concrete stream
//! technology (Redis Streams); everything else in the workspace depends on
//! the [`StreamBus`] trait.

mod error;
mod metrics;
mod naming;
mod redis_bus;

pub use error::StreamBusError;
pub use naming::{dlq_key, group_name, stream_key};
pub use redis_bus::RedisStreamBus;

use async_trait::async_trait;
use event_schema::EventEnvelope;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub topic: String,
    pub envelope: EventEnvelope,
}

#[derive(Debug, Clone)]
pub struct PendingInfo {
    pub id: String,
    pub consumer: String,
    pub idle: Duration,
    pub delivery_count: u64,
}

/// Operations every component depends on instead of the concrete bus client.
#[async_trait]
pub trait StreamBus: Send + Sync {
    /// Appends the envelope to `topic`, returning the bus-assigned stream id.
    /// Idempotent on `event_id` only by contract with the caller (the reader
    /// claims rows by id and only advances on success) -- the bus itself
    /// does not de-duplicate.
    async fn append(&self, topic: &str, envelope: &EventEnvelope) -> Result<String, StreamBusError>;

    /// Creates the consumer group for `topic` if it does not already exist.
    async fn ensure_group(&self, topic: &str, group: &str) -> Result<(), StreamBusError>;

    async fn read(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamBusError>;

    async fn ack(&self, group: &str, topic: &str, stream_id: &str) -> Result<(), StreamBusError>;

    async fn pending(&self, group: &str, topic: &str) -> Result<Vec<PendingInfo>, StreamBusError>;

    /// Reclaims messages a dead consumer never acked.
    async fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        min_idle: Duration,
    ) -> Result<Vec<StreamEntry>, StreamBusError>;

    async fn dead_letter(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
        reason: &str,
    ) -> Result<String, StreamBusError>;

    async fn trim(&self, topic: &str, max_age: Duration) -> Result<(), StreamBusError>;

    /// Administrative scan over a topic's dead-letter stream, for the DLQ
    /// manager's listing and reprocess operations. Not part of the
    /// consumer-group read path.
    async fn scan_dead_letters(
        &self,
        topic: &str,
        count: usize,
    ) -> Result<Vec<DeadLetterEntry>, StreamBusError>;

    async fn remove_dead_letter(&self, topic: &str, dlq_id: &str) -> Result<(), StreamBusError>;

    /// Direct catch-up read of everything strictly after `after_id` on
    /// `topic`, independent of any consumer group. Used when a connection
    /// reconnects with a `last_event_id` and needs to replay the gap before
    /// rejoining the live per-tenant dispatch loop (§8 replay scenarios).
    async fn read_from(
        &self,
        topic: &str,
        after_id: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StreamBusError>;

    /// Lightweight reachability check, independent of any topic -- used by
    /// the gateway's `/healthz` probe.
    async fn ping(&self) -> Result<(), StreamBusError>;
}

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub dlq_id: String,
    pub topic: String,
    pub envelope: EventEnvelope,
    pub reason: String,
}
