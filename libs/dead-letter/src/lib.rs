//! Dead-letter inspection, alerting and reprocessing (§4.6).
//!
//! The outbox reader and the dispatcher both move poison or permanently
//! failed envelopes to a per-topic dead-letter stream via
//! [`stream_bus::StreamBus::dead_letter`]. This crate is the consumer side:
//! it watches DLQ depth/age/ingress-rate, and exposes the admin reprocess
//! operation that moves entries back to their origin topic with `attempts`
//! reset.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use error_types::ServiceError;
use event_schema::{EventEnvelope, SchemaRegistry};
use serde_json::Value;
use stream_bus::{DeadLetterEntry, StreamBus, StreamBusError};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error(transparent)]
    Bus(#[from] StreamBusError),
    #[error("replacement payload failed schema validation: {0}")]
    Validation(#[from] event_schema::SchemaError),
}

impl From<DlqError> for ServiceError {
    fn from(err: DlqError) -> Self {
        match err {
            DlqError::Bus(e) => ServiceError::Transient(e.to_string()),
            DlqError::Validation(e) => ServiceError::Validation(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub depth: u64,
    pub oldest_age: Duration,
    pub ingress_rate_per_min: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            depth: 100,
            oldest_age: Duration::from_secs(3600),
            ingress_rate_per_min: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    DepthExceeded { topic: String, depth: u64 },
    OldestAgeExceeded { topic: String, age: Duration },
    IngressRateSpike { topic: String, per_minute: f64 },
}

pub struct DlqManager<B: StreamBus> {
    bus: Arc<B>,
    schemas: Arc<SchemaRegistry>,
    thresholds: AlertThresholds,
    last_check_unix_ms: AtomicI64,
    last_check_depth: AtomicU64,
}

impl<B: StreamBus> DlqManager<B> {
    pub fn new(bus: Arc<B>, schemas: Arc<SchemaRegistry>, thresholds: AlertThresholds) -> Self {
        Self {
            bus,
            schemas,
            thresholds,
            last_check_unix_ms: AtomicI64::new(0),
            last_check_depth: AtomicU64::new(0),
        }
    }

    pub async fn list(&self, topic: &str, count: usize) -> Result<Vec<DeadLetterEntry>, StreamBusError> {
        self.bus.scan_dead_letters(topic, count).await
    }

    /// Scans up to `sample_size` entries and emits whichever of the three
    /// threshold alerts currently apply.
    pub async fn check_alerts(&self, topic: &str, sample_size: usize) -> Result<Vec<Alert>, StreamBusError> {
        let entries = self.bus.scan_dead_letters(topic, sample_size).await?;
        let mut alerts = Vec::new();

        let depth = entries.len() as u64;
        if depth >= self.thresholds.depth {
            alerts.push(Alert::DepthExceeded {
                topic: topic.to_string(),
                depth,
            });
        }

        if let Some(oldest) = entries.iter().map(|e| e.envelope.occurred_at).min() {
            let age = (chrono::Utc::now() - oldest)
                .to_std()
                .unwrap_or_default();
            if age >= self.thresholds.oldest_age {
                alerts.push(Alert::OldestAgeExceeded {
                    topic: topic.to_string(),
                    age,
                });
            }
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let prev_ms = self.last_check_unix_ms.swap(now_ms, Ordering::SeqCst);
        let prev_depth = self.last_check_depth.swap(depth, Ordering::SeqCst);
        if prev_ms > 0 && depth > prev_depth {
            let elapsed_min = ((now_ms - prev_ms) as f64 / 60_000.0).max(1.0 / 60.0);
            let rate = (depth - prev_depth) as f64 / elapsed_min;
            if rate >= self.thresholds.ingress_rate_per_min {
                alerts.push(Alert::IngressRateSpike {
                    topic: topic.to_string(),
                    per_minute: rate,
                });
            }
        }

        for alert in &alerts {
            warn!(?alert, "dead-letter alert threshold crossed");
        }
        Ok(alerts)
    }

    /// Moves a single DLQ entry back to its origin topic with a fresh
    /// publish (equivalent to resetting `attempts` to zero on the outbox
    /// side, since the entry is re-appended as a new bus publish rather than
    /// replayed from the original failed attempt). `payload_override`, when
    /// given, replaces the stored payload before re-validation and
    /// re-append -- the operator's fix for a poison payload (§8 scenario 4,
    /// "an admin reprocess call with a fixed payload causes successful
    /// delivery").
    pub async fn reprocess_one(
        &self,
        topic: &str,
        dlq_id: &str,
        payload_override: Option<Value>,
    ) -> Result<(), DlqError> {
        let entries = self.bus.scan_dead_letters(topic, 1000).await?;
        let Some(entry) = entries.into_iter().find(|e| e.dlq_id == dlq_id) else {
            return Err(DlqError::Bus(StreamBusError::NotFound(dlq_id.to_string())));
        };
        self.republish(topic, &entry.envelope, payload_override)
            .await?;
        self.bus.remove_dead_letter(topic, dlq_id).await?;
        Ok(())
    }

    /// Reprocesses every DLQ entry on `topic` matching `filter`, all with the
    /// same stored payload -- a payload override only makes sense against a
    /// single, identified entry.
    pub async fn reprocess_matching(
        &self,
        topic: &str,
        filter: impl Fn(&EventEnvelope) -> bool,
    ) -> Result<usize, DlqError> {
        let entries = self.bus.scan_dead_letters(topic, 10_000).await?;
        let mut count = 0;
        for entry in entries {
            if filter(&entry.envelope) {
                self.republish(topic, &entry.envelope, None).await?;
                self.bus.remove_dead_letter(topic, &entry.dlq_id).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn republish(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
        payload_override: Option<Value>,
    ) -> Result<(), DlqError> {
        let mut envelope = envelope.clone();
        if let Some(payload) = payload_override {
            envelope.payload = payload;
        }
        self.schemas.validate(
            &envelope.event_type,
            envelope.schema_version,
            &envelope.payload,
        )?;
        self.bus.append(topic, &envelope).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_are_sane() {
        let t = AlertThresholds::default();
        assert_eq!(t.depth, 100);
        assert_eq!(t.oldest_age, Duration::from_secs(3600));
    }
}
