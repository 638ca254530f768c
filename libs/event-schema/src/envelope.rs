use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The stable wire contract for every event moving through the outbox, the
/// stream bus, and the push endpoints. Payloads are carried as an opaque
/// [`serde_json::Value`] at this layer; callers decode into a concrete,
/// per-variant struct only where they actually need typed fields (writer
/// validation, a specific handler).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub schema_version: u32,
    pub tenant_id: String,
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
    pub producer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        schema_version: u32,
        tenant_id: impl Into<String>,
        aggregate_id: impl Into<String>,
        producer: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            schema_version,
            tenant_id: tenant_id.into(),
            aggregate_id: aggregate_id.into(),
            occurred_at: Utc::now(),
            producer: producer.into(),
            trace_id: None,
            user_id: None,
            payload,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Topic prefix derived from the event type, e.g. `order_created` -> `order`.
    /// Topics are named `{product}:stream:{topic}` at the bus boundary; this
    /// returns just the bare `{topic}` segment.
    pub fn topic(&self) -> &str {
        self.event_type
            .split('_')
            .next()
            .unwrap_or(&self.event_type)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_derives_from_event_type_prefix() {
        let e = EventEnvelope::new(
            "order_created",
            1,
            "t1",
            "o1",
            "orders-service",
            serde_json::json!({}),
        );
        assert_eq!(e.topic(), "order");
    }

    #[test]
    fn round_trips_through_json() {
        let e = EventEnvelope::new(
            "order_updated",
            1,
            "t1",
            "o1",
            "orders-service",
            serde_json::json!({"status": "shipped"}),
        )
        .with_trace_id("trace-1");
        let json = e.to_json().unwrap();
        let back = EventEnvelope::from_json(&json).unwrap();
        assert_eq!(e, back);
    }
}
