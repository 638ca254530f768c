//! Server-Sent Events push endpoint (§5, one-way fan-out). `GET /stream`,
//! `/stream/orders` and `/stream/notifications` all share this handler,
//! parameterized by topic; each opens a long-lived `text/event-stream`
//! response fed by the connection's outbound queue and periodically
//! interleaves a heartbeat comment so proxies and clients don't time the
//! connection out during quiet periods.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpRequest, HttpResponse};
use futures::stream::{self, Stream};
use tokio::sync::{mpsc, Notify};

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::registry::{Protocol, RemovalReason};

#[derive(Debug, serde::Deserialize)]
pub struct StreamParams {
    /// Comma-separated subscription filters, e.g. `order_*,payment_failed`.
    /// Defaults to `*` (everything the tenant is entitled to see on this
    /// topic) when omitted.
    pub events: Option<String>,
    /// Resume point from a previous connection; when present the handler
    /// replays the gap via a direct catch-up read before joining live
    /// dispatch.
    pub last_event_id: Option<String>,
}

fn heartbeat_interval(topic: &str, cfg: &crate::config::PushConfig) -> Duration {
    let secs = match topic {
        "order" => cfg.heartbeat_seconds_orders,
        "notification" => cfg.heartbeat_seconds_notifications,
        _ => cfg.heartbeat_seconds_general,
    };
    Duration::from_secs(secs)
}

fn sse_frame(event_type: &str, id: &str, data: &str) -> web::Bytes {
    web::Bytes::from(format!("event: {event_type}\nid: {id}\ndata: {data}\n\n"))
}

enum SseItem {
    Event(web::Bytes),
    Heartbeat,
    Closed(RemovalReason),
}

async fn next_item(
    mut rx: mpsc::Receiver<event_schema::EventEnvelope>,
    heartbeat: Duration,
    close_notify: Arc<Notify>,
) -> Option<(
    SseItem,
    (mpsc::Receiver<event_schema::EventEnvelope>, Duration, Arc<Notify>),
)> {
    tokio::select! {
        maybe_envelope = rx.recv() => {
            match maybe_envelope {
                Some(envelope) => {
                    let data = envelope.to_json().unwrap_or_else(|_| "{}".to_string());
                    let frame = sse_frame(&envelope.event_type, &envelope.event_id.to_string(), &data);
                    Some((SseItem::Event(frame), (rx, heartbeat, close_notify)))
                }
                None => Some((SseItem::Closed(RemovalReason::ClientDisconnect), (rx, heartbeat, close_notify))),
            }
        }
        _ = tokio::time::sleep(heartbeat) => {
            Some((SseItem::Heartbeat, (rx, heartbeat, close_notify)))
        }
        // Overflow disconnect (§8 boundary behavior): the dispatcher's task
        // flips `alive = false` and fires this signal; an SSE body has no
        // wire-level close code, so the fix here is simply to end the
        // stream rather than leave it open and silently un-fed.
        _ = close_notify.notified() => {
            Some((SseItem::Closed(RemovalReason::Overflow), (rx, heartbeat, close_notify)))
        }
    }
}

/// Removes the connection from the registry when the SSE response body is
/// dropped, which actix does as soon as the client disconnects or the
/// handler's future is cancelled -- the only reliable teardown signal for a
/// streaming response.
struct ConnectionGuard {
    registry: std::sync::Arc<crate::registry::ConnectionRegistry>,
    id: crate::registry::ConnectionId,
    reason: std::cell::Cell<RemovalReason>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id, self.reason.get());
    }
}

fn sse_body(
    rx: mpsc::Receiver<event_schema::EventEnvelope>,
    heartbeat: Duration,
    close_notify: Arc<Notify>,
    guard: ConnectionGuard,
) -> impl Stream<Item = Result<web::Bytes, actix_web::Error>> {
    stream::unfold(
        Some((rx, heartbeat, close_notify, guard)),
        |state| async move {
            let (rx, heartbeat, close_notify, guard) = state?;
            match next_item(rx, heartbeat, close_notify).await {
                Some((SseItem::Event(bytes), (rx, heartbeat, close_notify))) => {
                    Some((Ok(bytes), Some((rx, heartbeat, close_notify, guard))))
                }
                Some((SseItem::Heartbeat, (rx, heartbeat, close_notify))) => Some((
                    Ok(web::Bytes::from_static(b": hb\n\n")),
                    Some((rx, heartbeat, close_notify, guard)),
                )),
                Some((SseItem::Closed(reason), _)) => {
                    guard.reason.set(reason);
                    None
                }
                None => None,
            }
        },
    )
}

/// `/stream/{topic}`: subscribes to the one named topic.
pub async fn stream_handler(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<StreamParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    stream_impl(req, vec![path.into_inner()], query, state).await
}

/// `/stream`: no topic segment, subscribes across every topic this gateway
/// serves, filtered the same way a single-topic connection is.
pub async fn stream_handler_all(
    req: HttpRequest,
    query: web::Query<StreamParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let topics = crate::dispatcher::known_topics().into_keys().map(str::to_string).collect();
    stream_impl(req, topics, query, state).await
}

async fn stream_impl(
    req: HttpRequest,
    topics: Vec<String>,
    query: web::Query<StreamParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let tenant_id = crate::auth::stream_tenant_id_from_request(&req)?;
    let user_id = crate::auth::stream_user_id_from_request(&req);

    let filters: Vec<String> = query
        .events
        .as_deref()
        .unwrap_or("*")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let registered = state
        .registry
        .register(tenant_id.clone(), user_id, Protocol::OneWay, filters);
    let connection_id = registered.id;

    for topic in &topics {
        if let Some(after_id) = query.last_event_id.as_deref() {
            match state.dispatcher.replay_since(topic, after_id, 500).await {
                Ok(entries) => {
                    for entry in &entries {
                        state
                            .registry
                            .for_each_matching(&tenant_id, &entry.envelope.event_type, &entry.envelope);
                    }
                    tracing::info!(%connection_id, topic, after_id, replayed = entries.len(), "replayed gap on reconnect");
                }
                Err(e) => tracing::warn!(%connection_id, topic, after_id, "replay failed: {e}"),
            }
        }

        state
            .dispatcher
            .ensure_loop_running(topic, &tenant_id, state.config.breaker_config());
    }

    let heartbeat = topics
        .first()
        .map(|t| heartbeat_interval(t, &state.config.push))
        .unwrap_or_else(|| Duration::from_secs(state.config.push.heartbeat_seconds_general));
    let guard = ConnectionGuard {
        registry: state.registry.clone(),
        id: connection_id,
        reason: std::cell::Cell::new(RemovalReason::ClientDisconnect),
    };
    let body = sse_body(registered.receiver, heartbeat, registered.close_notify, guard);

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}
