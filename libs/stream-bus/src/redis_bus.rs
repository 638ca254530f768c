use async_trait::async_trait;
use event_schema::EventEnvelope;
use redis::aio::ConnectionManager;
use redis::streams::{StreamClaimOptions, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::StreamBusError;
use crate::metrics::BUS_APPEND_DURATION_SECONDS;
use crate::naming::{dlq_key, stream_key};
use crate::{DeadLetterEntry, PendingInfo, StreamBus, StreamEntry};

const ENVELOPE_FIELD: &str = "envelope";

/// Redis Streams-backed implementation of [`StreamBus`]. Topics map to
/// `{product}:stream:{topic}`; the DLQ for a topic is a sibling stream at
/// `{product}:dlq:{topic}`.
pub struct RedisStreamBus {
    conn: ConnectionManager,
    product: String,
}

impl RedisStreamBus {
    pub async fn connect(url: &str, product: impl Into<String>) -> Result<Self, StreamBusError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            product: product.into(),
        })
    }

    fn decode_entry(topic: &str, id: String, fields: Vec<(String, String)>) -> Option<StreamEntry> {
        let raw = fields
            .into_iter()
            .find(|(k, _)| k == ENVELOPE_FIELD)
            .map(|(_, v)| v)?;
        match EventEnvelope::from_json(&raw) {
            Ok(envelope) => Some(StreamEntry {
                id,
                topic: topic.to_string(),
                envelope,
            }),
            Err(e) => {
                warn!(topic, id, "failed to decode stream entry: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl StreamBus for RedisStreamBus {
    async fn append(&self, topic: &str, envelope: &EventEnvelope) -> Result<String, StreamBusError> {
        let key = stream_key(&self.product, topic);
        let payload = envelope.to_json()?;
        let mut conn = self.conn.clone();
        let start = std::time::Instant::now();
        let id: String = conn
            .xadd(&key, "*", &[(ENVELOPE_FIELD, payload.as_str())])
            .await?;
        BUS_APPEND_DURATION_SECONDS
            .with_label_values(&[topic])
            .observe(start.elapsed().as_secs_f64());
        debug!(topic, id, event_id = %envelope.event_id, "appended to stream bus");
        Ok(id)
    }

    async fn ensure_group(&self, topic: &str, group: &str) -> Result<(), StreamBusError> {
        let key = stream_key(&self.product, topic);
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn.xgroup_create_mkstream(&key, group, "$").await;
        if let Err(e) = result {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn read(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamBusError> {
        let key = stream_key(&self.product, topic);
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);
        let reply: StreamReadReply = conn.xread_options(&[&key], &[">"], &opts).await?;

        let mut entries = Vec::new();
        for stream_key_reply in reply.keys {
            for id in stream_key_reply.ids {
                let fields: Vec<(String, String)> = id
                    .map
                    .into_iter()
                    .filter_map(|(k, v)| match v {
                        redis::Value::Data(bytes) => {
                            Some((k, String::from_utf8_lossy(&bytes).to_string()))
                        }
                        _ => None,
                    })
                    .collect();
                if let Some(entry) = Self::decode_entry(topic, id.id, fields) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    async fn ack(&self, group: &str, topic: &str, stream_id: &str) -> Result<(), StreamBusError> {
        let key = stream_key(&self.product, topic);
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(&key, group, &[stream_id]).await?;
        Ok(())
    }

    async fn pending(&self, group: &str, topic: &str) -> Result<Vec<PendingInfo>, StreamBusError> {
        let key = stream_key(&self.product, topic);
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamPendingCountReply = conn
            .xpending_count(&key, group, "-", "+", 1000)
            .await?;
        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingInfo {
                id: p.id,
                consumer: p.consumer,
                idle: Duration::from_millis(p.time_since_delivered as u64),
                delivery_count: p.times_delivered as u64,
            })
            .collect())
    }

    async fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        topic: &str,
        min_idle: Duration,
    ) -> Result<Vec<StreamEntry>, StreamBusError> {
        let key = stream_key(&self.product, topic);
        let mut conn = self.conn.clone();
        let pending = self.pending(group, topic).await?;
        let stale_ids: Vec<String> = pending
            .into_iter()
            .filter(|p| p.idle >= min_idle)
            .map(|p| p.id)
            .collect();
        if stale_ids.is_empty() {
            return Ok(Vec::new());
        }

        let opts = StreamClaimOptions::default();
        let reply: StreamReadReply = conn
            .xclaim_options(
                &key,
                group,
                consumer,
                min_idle.as_millis() as usize,
                &stale_ids,
                opts,
            )
            .await?;

        let mut entries = Vec::new();
        for stream_key_reply in reply.keys {
            for id in stream_key_reply.ids {
                let fields: Vec<(String, String)> = id
                    .map
                    .into_iter()
                    .filter_map(|(k, v)| match v {
                        redis::Value::Data(bytes) => {
                            Some((k, String::from_utf8_lossy(&bytes).to_string()))
                        }
                        _ => None,
                    })
                    .collect();
                if let Some(entry) = Self::decode_entry(topic, id.id, fields) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    async fn dead_letter(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
        reason: &str,
    ) -> Result<String, StreamBusError> {
        let key = dlq_key(&self.product, topic);
        let payload = envelope.to_json()?;
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(
                &key,
                "*",
                &[(ENVELOPE_FIELD, payload.as_str()), ("reason", reason)],
            )
            .await?;
        warn!(topic, event_id = %envelope.event_id, reason, "moved to dead-letter stream");
        Ok(id)
    }

    async fn trim(&self, topic: &str, max_age: Duration) -> Result<(), StreamBusError> {
        let key = stream_key(&self.product, topic);
        let cutoff_ms = chrono::Utc::now().timestamp_millis() - max_age.as_millis() as i64;
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XTRIM")
            .arg(&key)
            .arg("MINID")
            .arg("~")
            .arg(format!("{cutoff_ms}-0"))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn scan_dead_letters(
        &self,
        topic: &str,
        count: usize,
    ) -> Result<Vec<DeadLetterEntry>, StreamBusError> {
        let key = dlq_key(&self.product, topic);
        let mut conn = self.conn.clone();
        let raw: Vec<(String, Vec<(String, redis::Value)>)> = redis::cmd("XRANGE")
            .arg(&key)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut entries = Vec::new();
        for (id, fields) in raw {
            let mut envelope_raw = None;
            let mut reason = String::new();
            for (field, value) in fields {
                if let redis::Value::Data(bytes) = value {
                    let text = String::from_utf8_lossy(&bytes).to_string();
                    if field == ENVELOPE_FIELD {
                        envelope_raw = Some(text);
                    } else if field == "reason" {
                        reason = text;
                    }
                }
            }
            if let Some(raw_envelope) = envelope_raw {
                if let Ok(envelope) = EventEnvelope::from_json(&raw_envelope) {
                    entries.push(DeadLetterEntry {
                        dlq_id: id,
                        topic: topic.to_string(),
                        envelope,
                        reason,
                    });
                }
            }
        }
        Ok(entries)
    }

    async fn remove_dead_letter(&self, topic: &str, dlq_id: &str) -> Result<(), StreamBusError> {
        let key = dlq_key(&self.product, topic);
        let mut conn = self.conn.clone();
        let _: i64 = conn.xdel(&key, &[dlq_id]).await?;
        Ok(())
    }

    async fn read_from(
        &self,
        topic: &str,
        after_id: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StreamBusError> {
        let key = stream_key(&self.product, topic);
        let mut conn = self.conn.clone();
        let raw: Vec<(String, Vec<(String, redis::Value)>)> = redis::cmd("XRANGE")
            .arg(&key)
            .arg(format!("({after_id}"))
            .arg("+")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut entries = Vec::new();
        for (id, fields) in raw {
            let decoded_fields: Vec<(String, String)> = fields
                .into_iter()
                .filter_map(|(k, v)| match v {
                    redis::Value::Data(bytes) => Some((k, String::from_utf8_lossy(&bytes).to_string())),
                    _ => None,
                })
                .collect();
            if let Some(entry) = Self::decode_entry(topic, id, decoded_fields) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn ping(&self) -> Result<(), StreamBusError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
