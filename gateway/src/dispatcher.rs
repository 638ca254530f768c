//! Consumer-Group Dispatcher (§4.4): one background loop per
//! `(subsystem, tenant_id)` pair, created lazily on the first connection for
//! that tenant and torn down after an idle grace period with no live
//! connections. Each loop reads a batch from the stream bus under a shared
//! consumer group, fans matching entries out to the connection registry, and
//! acks according to the configured [`AckPolicy`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use idempotency::IdempotencyGuard;
use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use stream_bus::StreamBus;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::{AckPolicy, DispatcherConfig};
use crate::metrics;
use crate::registry::ConnectionRegistry;

const READ_BATCH_SIZE: usize = 50;
const READ_BLOCK_MS: u64 = 2000;
const CLAIM_STALE_EVERY: u64 = 10;
const MIN_IDLE_FOR_CLAIM: Duration = Duration::from_secs(60);

/// Identifies one dispatch loop: a subsystem (maps to a topic, e.g. `order`,
/// `notification`) scoped to a single tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub topic: String,
    pub tenant_id: String,
}

struct LoopHandle {
    join: JoinHandle<()>,
    touch: Arc<Notify>,
}

/// Owns the set of running per-tenant dispatch loops and the shared
/// breaker-per-topic state that guards calls into the stream bus.
pub struct Dispatcher<B: StreamBus + 'static> {
    bus: Arc<B>,
    registry: Arc<ConnectionRegistry>,
    config: DispatcherConfig,
    consumer_id: String,
    loops: DashMap<DispatchKey, LoopHandle>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    idempotency: Arc<IdempotencyGuard>,
}

impl<B: StreamBus + 'static> Dispatcher<B> {
    pub fn new(
        bus: Arc<B>,
        registry: Arc<ConnectionRegistry>,
        config: DispatcherConfig,
        consumer_id: impl Into<String>,
        idempotency: Arc<IdempotencyGuard>,
    ) -> Self {
        Self {
            bus,
            registry,
            config,
            consumer_id: consumer_id.into(),
            loops: DashMap::new(),
            breakers: DashMap::new(),
            idempotency,
        }
    }

    fn breaker_for(&self, topic: &str, breaker_config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(breaker_config.clone())))
            .clone()
    }

    /// Ensures a dispatch loop is running for `(topic, tenant_id)`, spawning
    /// one if this is the first live connection for the pair. Idempotent:
    /// calling it again for an already-running pair just bumps its idle
    /// timer.
    pub fn ensure_loop_running(
        self: &Arc<Self>,
        topic: &str,
        tenant_id: &str,
        breaker_config: CircuitBreakerConfig,
    ) {
        let key = DispatchKey {
            topic: topic.to_string(),
            tenant_id: tenant_id.to_string(),
        };
        if let Some(existing) = self.loops.get(&key) {
            existing.touch.notify_one();
            return;
        }

        let touch = Arc::new(Notify::new());
        let dispatcher = self.clone();
        let group = stream_bus::group_name("dispatcher", tenant_id);
        let topic_owned = topic.to_string();
        let tenant_owned = tenant_id.to_string();
        let touch_clone = touch.clone();
        let breaker = self.breaker_for(topic, &breaker_config);

        let idempotency = self.idempotency.clone();
        let join = tokio::spawn(async move {
            dispatcher
                .run_loop(topic_owned, tenant_owned, group, touch_clone, breaker, idempotency)
                .await;
        });

        self.loops.insert(key, LoopHandle { join, touch });
    }

    async fn run_loop(
        self: Arc<Self>,
        topic: String,
        tenant_id: String,
        group: String,
        touch: Arc<Notify>,
        breaker: Arc<CircuitBreaker>,
        idempotency: Arc<IdempotencyGuard>,
    ) {
        if let Err(e) = self.bus.ensure_group(&topic, &group).await {
            tracing::error!(topic, tenant_id, "failed to ensure consumer group: {e}");
            return;
        }
        tracing::info!(topic, tenant_id, "dispatch loop started");

        let idle_deadline = Duration::from_secs(self.config.idle_shutdown_secs);
        let mut iterations: u64 = 0;

        loop {
            iterations += 1;
            let has_connections = self.registry.tenant_connection_count(&tenant_id) > 0;

            if !has_connections {
                tokio::select! {
                    _ = touch.notified() => continue,
                    _ = tokio::time::sleep(idle_deadline) => {
                        if self.registry.tenant_connection_count(&tenant_id) == 0 {
                            tracing::info!(topic, tenant_id, "dispatch loop idle, shutting down");
                            break;
                        }
                    }
                }
                continue;
            }

            let read_result = breaker
                .call(|| {
                    self.bus
                        .read(&group, &self.consumer_id, &topic, READ_BATCH_SIZE, READ_BLOCK_MS)
                })
                .await;

            metrics::CIRCUIT_STATE
                .with_label_values(&[&topic])
                .set(circuit_state_value(breaker.state()));

            let entries = match read_result {
                Ok(entries) => entries,
                Err(resilience::circuit_breaker::CircuitBreakerError::Open) => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
                Err(resilience::circuit_breaker::CircuitBreakerError::CallFailed(e)) => {
                    tracing::warn!(topic, tenant_id, "stream read failed: {e}");
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    continue;
                }
            };

            for entry in &entries {
                if entry.envelope.tenant_id != tenant_id {
                    // Defensive: a consumer group is per-tenant by
                    // construction (naming::group_name embeds tenant_id), so
                    // this should never fire, but cross-tenant delivery is
                    // the one failure mode this system cannot tolerate.
                    tracing::error!(
                        topic,
                        tenant_id,
                        event_tenant = entry.envelope.tenant_id,
                        "cross-tenant entry observed in tenant-scoped read, dropping"
                    );
                    continue;
                }

                let event_id = entry.envelope.event_id.to_string();
                match idempotency.is_processed(&event_id).await {
                    Ok(true) => {
                        // A reprocessed DLQ entry or an at-least-once redelivery
                        // of something already handed to a connection; ack it
                        // off the pending list without delivering twice.
                        tracing::debug!(topic, tenant_id, event_id, "duplicate suppressed by idempotency guard");
                        if let Err(e) = self.bus.ack(&group, &topic, &entry.id).await {
                            tracing::warn!(topic, tenant_id, stream_id = %entry.id, "ack failed: {e}");
                        }
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(topic, tenant_id, event_id, "idempotency check failed, delivering anyway: {e}");
                    }
                }

                let (delivered, matched) = self.registry.for_each_matching(
                    &tenant_id,
                    &entry.envelope.event_type,
                    &entry.envelope,
                );
                metrics::EVENTS_CONSUMED_TOTAL.inc();

                let should_ack = match self.config.ack_policy {
                    AckPolicy::BestEffort => true,
                    AckPolicy::AllConnected => delivered >= matched,
                };

                if should_ack {
                    if let Err(e) = self.bus.ack(&group, &topic, &entry.id).await {
                        tracing::warn!(topic, tenant_id, stream_id = %entry.id, "ack failed: {e}");
                    }
                    if let Err(e) = idempotency.mark_processed(&event_id).await {
                        tracing::warn!(topic, tenant_id, event_id, "failed to record idempotency marker: {e}");
                    }
                } else {
                    tracing::debug!(
                        topic,
                        tenant_id,
                        stream_id = %entry.id,
                        delivered,
                        "withholding ack under all_connected policy, entry remains pending"
                    );
                }
            }

            if iterations % CLAIM_STALE_EVERY == 0 {
                match self
                    .bus
                    .claim_stale(&group, &self.consumer_id, &topic, MIN_IDLE_FOR_CLAIM)
                    .await
                {
                    Ok(claimed) if !claimed.is_empty() => {
                        tracing::info!(topic, tenant_id, count = claimed.len(), "reclaimed stale entries");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(topic, tenant_id, "claim_stale failed: {e}"),
                }

                match self.bus.pending(&group, &topic).await {
                    Ok(pending) => {
                        metrics::STREAM_CONSUMER_LAG
                            .with_label_values(&[&tenant_id, &topic])
                            .set(pending.len() as i64);
                    }
                    Err(e) => tracing::warn!(topic, tenant_id, "pending lookup failed: {e}"),
                }
            }
        }
    }

    pub fn running_loop_count(&self) -> usize {
        self.loops.len()
    }

    pub async fn bus_is_reachable(&self) -> bool {
        self.bus.ping().await.is_ok()
    }

    /// Looks up the circuit breaker for `topic`, if a dispatch loop has run
    /// for it at least once. Used by the admin override endpoints.
    pub fn breaker(&self, topic: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(topic).map(|b| b.clone())
    }

    /// Loads for a reconnecting connection the events it missed since
    /// `after_id`, via the bus's direct catch-up read, before handing it
    /// back to the live dispatch loop for `topic`/`tenant_id`.
    pub async fn replay_since(
        &self,
        topic: &str,
        after_id: &str,
        count: usize,
    ) -> Result<Vec<stream_bus::StreamEntry>, stream_bus::StreamBusError> {
        self.bus.read_from(topic, after_id, count).await
    }
}

fn circuit_state_value(state: resilience::circuit_breaker::CircuitState) -> i64 {
    match state {
        resilience::circuit_breaker::CircuitState::Closed => 0,
        resilience::circuit_breaker::CircuitState::HalfOpen => 1,
        resilience::circuit_breaker::CircuitState::Open => 2,
    }
}

/// Tracks the set of topics a gateway instance actually serves, so callers
/// don't have to hardcode `["order", "notification", ...]` in more than one
/// place.
pub fn known_topics() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("order", "orders"),
        ("notification", "notifications"),
        ("payment", "payments"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_topics_is_non_empty() {
        assert!(!known_topics().is_empty());
    }
}
