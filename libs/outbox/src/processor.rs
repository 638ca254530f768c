use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration as ChronoDuration;
use event_schema::SchemaRegistry;
use resilience::backoff_for_attempt;
use resilience::RetryConfig;
use stream_bus::StreamBus;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::metrics::OutboxMetrics;
use crate::repository::OutboxRepository;

#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    pub worker_id: String,
    pub poll_interval: StdDuration,
    pub batch_size: i64,
    pub visibility_timeout: ChronoDuration,
    pub max_attempts: i32,
    pub retry: RetryConfig,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            poll_interval: StdDuration::from_millis(100),
            batch_size: 100,
            visibility_timeout: ChronoDuration::seconds(30),
            max_attempts: 8,
            retry: RetryConfig {
                max_attempts: 8,
                base: StdDuration::from_secs(1),
                cap: StdDuration::from_secs(60),
            },
        }
    }
}

/// Polls unprocessed outbox rows, claims batches with `SKIP LOCKED`,
/// publishes each to the stream bus, and marks them processed (§4.2).
pub struct OutboxProcessor<R: OutboxRepository, B: StreamBus> {
    repository: Arc<R>,
    bus: Arc<B>,
    schemas: Arc<SchemaRegistry>,
    metrics: Option<Arc<OutboxMetrics>>,
    config: OutboxProcessorConfig,
}

impl<R: OutboxRepository, B: StreamBus> OutboxProcessor<R, B> {
    pub fn new(
        repository: Arc<R>,
        bus: Arc<B>,
        schemas: Arc<SchemaRegistry>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            repository,
            bus,
            schemas,
            metrics: None,
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<OutboxMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs until `shutdown` reports `true`. On shutdown, finishes the
    /// in-flight batch and returns without claiming another.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.config.worker_id, "outbox processor starting");
        loop {
            if let Err(e) = self.process_batch().await {
                error!("outbox batch processing failed: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(worker_id = %self.config.worker_id, "outbox processor shutting down");
                        return;
                    }
                }
            }
        }
    }

    pub async fn process_batch(&self) -> crate::error::OutboxResult<usize> {
        let rows = self
            .repository
            .claim_batch(
                &self.config.worker_id,
                self.config.batch_size,
                self.config.visibility_timeout,
            )
            .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let mut processed = 0usize;
        for row in rows {
            let envelope = row.to_envelope();

            if self
                .schemas
                .is_known(&envelope.event_type, envelope.schema_version)
            {
                if let Err(e) = self.schemas.validate(
                    &envelope.event_type,
                    envelope.schema_version,
                    &envelope.payload,
                ) {
                    warn!(id = row.id, "schema validation failed on read path: {}", e);
                    self.move_to_dead_letter(row.id, &envelope, &e.to_string())
                        .await?;
                    continue;
                }
            } else {
                info!(
                    id = row.id,
                    event_type = %envelope.event_type,
                    schema_version = envelope.schema_version,
                    "unknown event type on read path, forwarding untouched"
                );
            }

            let topic = envelope.topic().to_string();
            match self.bus.append(&topic, &envelope).await {
                Ok(_stream_id) => {
                    self.repository.mark_processed(row.id).await?;
                    if let Some(m) = &self.metrics {
                        m.published.inc();
                    }
                    processed += 1;
                }
                Err(e) => {
                    if row.attempts + 1 >= self.config.max_attempts {
                        warn!(id = row.id, attempts = row.attempts + 1, "max attempts reached, moving to DLQ");
                        self.move_to_dead_letter(row.id, &envelope, &e.to_string())
                            .await?;
                    } else {
                        let delay = backoff_for_attempt(&self.config.retry, row.attempts as u32);
                        let retry_not_before = chrono::Utc::now()
                            + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::seconds(1));
                        self.repository
                            .mark_failed(row.id, &e.to_string(), retry_not_before)
                            .await?;
                    }
                }
            }
        }
        Ok(processed)
    }

    async fn move_to_dead_letter(
        &self,
        id: i64,
        envelope: &event_schema::EventEnvelope,
        reason: &str,
    ) -> crate::error::OutboxResult<()> {
        let topic = envelope.topic().to_string();
        self.bus
            .dead_letter(&topic, envelope, reason)
            .await
            .map_err(|e| crate::error::OutboxError::PublishFailed(e.to_string()))?;
        self.repository.mark_dead_lettered(id).await?;
        if let Some(m) = &self.metrics {
            m.dead_lettered.inc();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = OutboxProcessorConfig::default();
        assert_eq!(cfg.poll_interval, StdDuration::from_millis(100));
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.visibility_timeout, ChronoDuration::seconds(30));
        assert_eq!(cfg.max_attempts, 8);
    }
}
