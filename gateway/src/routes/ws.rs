//! Bidirectional WebSocket push endpoint (§5). `GET /ws`, `/ws/orders` via
//! an `actix-web-actors` session actor: the server pushes matching events
//! and accepts `subscribe`/`unsubscribe`/`ping`/`stats` control frames back
//! from the client.

use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::registry::{ConnectionId, Protocol, RemovalReason};
use event_schema::EventEnvelope;

const MISSED_PONG_TIMEOUT: Duration = Duration::from_secs(30);
const PING_INTERVAL: Duration = Duration::from_secs(10);

#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Push(EventEnvelope);

/// Raised by `bridge_close_signal` when the registry force-closes this
/// connection from outside the actor's own task (currently: overflow
/// disconnect, §8 boundary behavior "Overflow policy `disconnect` closes
/// connection with code `4001`").
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Overflow;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { filters: Vec<String> },
    Unsubscribe { filters: Vec<String> },
    Ping,
    Stats,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    Event {
        event_id: String,
        event_type: &'a str,
        tenant_id: &'a str,
        payload: &'a serde_json::Value,
    },
    Pong,
    Stats {
        tenant_connections: usize,
    },
    Error {
        message: String,
    },
}

struct PushSession {
    connection_id: ConnectionId,
    tenant_id: String,
    topic: String,
    state: web::Data<AppState>,
    hb: Instant,
    /// Unix timestamp the bearer token used to establish this connection
    /// expires at; checked on every heartbeat tick so a long-lived socket
    /// doesn't outlive the credential that authorized it.
    credential_expires_at: Option<i64>,
}

impl PushSession {
    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(PING_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > MISSED_PONG_TIMEOUT {
                tracing::warn!(connection_id = %act.connection_id, "missed pong, closing");
                act.state
                    .registry
                    .remove(act.connection_id, RemovalReason::HealthCheckFailed);
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Other(1011),
                    description: Some("missed heartbeat".into()),
                }));
                ctx.stop();
                return;
            }

            if let Some(expires_at) = act.credential_expires_at {
                if chrono::Utc::now().timestamp() >= expires_at {
                    tracing::info!(connection_id = %act.connection_id, "credential expired, closing");
                    act.state
                        .registry
                        .remove(act.connection_id, RemovalReason::CredentialExpired);
                    ctx.close(Some(ws::CloseReason {
                        code: ws::CloseCode::Other(1008),
                        description: Some("credential expired, reconnect".into()),
                    }));
                    ctx.stop();
                    return;
                }
            }

            ctx.ping(b"");
        });
    }
}

impl Actor for PushSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, tenant_id = %self.tenant_id, topic = %self.topic, "ws session started");
        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.state
            .registry
            .remove(self.connection_id, RemovalReason::ClientDisconnect);
        tracing::info!(connection_id = %self.connection_id, "ws session stopped");
    }
}

impl Handler<Push> for PushSession {
    type Result = ();

    fn handle(&mut self, msg: Push, ctx: &mut Self::Context) {
        let envelope = msg.0;
        let frame = ServerFrame::Event {
            event_id: envelope.event_id.to_string(),
            event_type: &envelope.event_type,
            tenant_id: &envelope.tenant_id,
            payload: &envelope.payload,
        };
        if let Ok(json) = serde_json::to_string(&frame) {
            ctx.text(json);
        }
    }
}

impl Handler<Overflow> for PushSession {
    type Result = ();

    fn handle(&mut self, _msg: Overflow, ctx: &mut Self::Context) {
        tracing::warn!(connection_id = %self.connection_id, "outbound queue overflowed, disconnecting");
        self.state
            .registry
            .remove(self.connection_id, RemovalReason::Overflow);
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Other(4001),
            description: Some("queue overflow, reconnect with last_event_id".into()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for PushSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Subscribe { filters }) => {
                    self.state.registry.subscribe(self.connection_id, filters);
                }
                Ok(ClientFrame::Unsubscribe { filters }) => {
                    self.state
                        .registry
                        .unsubscribe(self.connection_id, &filters);
                }
                Ok(ClientFrame::Ping) => {
                    self.hb = Instant::now();
                    if let Ok(json) = serde_json::to_string(&ServerFrame::Pong) {
                        ctx.text(json);
                    }
                }
                Ok(ClientFrame::Stats) => {
                    let tenant_connections =
                        self.state.registry.tenant_connection_count(&self.tenant_id);
                    if let Ok(json) =
                        serde_json::to_string(&ServerFrame::Stats { tenant_connections })
                    {
                        ctx.text(json);
                    }
                }
                Err(e) => {
                    let frame = ServerFrame::Error {
                        message: format!("malformed control frame: {e}"),
                    };
                    if let Ok(json) = serde_json::to_string(&frame) {
                        ctx.text(json);
                    }
                }
            },
            Ok(ws::Message::Binary(_)) => {
                tracing::debug!(connection_id = %self.connection_id, "binary frames unsupported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(connection_id = %self.connection_id, ?reason, "client closed");
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub events: Option<String>,
    pub last_event_id: Option<String>,
}

/// `/ws/{topic}`: subscribes to the one named topic.
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    query: web::Query<WsParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    ws_impl(req, stream, vec![path.into_inner()], query, state).await
}

/// `/ws`: no topic segment, subscribes across every topic this gateway
/// serves.
pub async fn ws_handler_all(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<WsParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let topics = crate::dispatcher::known_topics().into_keys().map(str::to_string).collect();
    ws_impl(req, stream, topics, query, state).await
}

async fn ws_impl(
    req: HttpRequest,
    stream: web::Payload,
    topics: Vec<String>,
    query: web::Query<WsParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let tenant_id = crate::auth::tenant_id_from_request(&req)
        .map_err(|e| actix_web::error::ErrorUnauthorized(e.to_string()))?;
    let user_id = crate::auth::user_id_from_request(&req);
    let credential_expires_at = crate::auth::expiry_from_request(&req);

    let filters: Vec<String> = query
        .events
        .as_deref()
        .unwrap_or("*")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let registered =
        state
            .registry
            .register(tenant_id.clone(), user_id, Protocol::Bidirectional, filters);
    let connection_id = registered.id;

    for topic in &topics {
        if let Some(after_id) = query.last_event_id.as_deref() {
            match state.dispatcher.replay_since(topic, after_id, 500).await {
                Ok(entries) => {
                    for entry in &entries {
                        state.registry.for_each_matching(
                            &tenant_id,
                            &entry.envelope.event_type,
                            &entry.envelope,
                        );
                    }
                }
                Err(e) => tracing::warn!(%connection_id, topic, after_id, "replay failed: {e}"),
            }
        }

        state
            .dispatcher
            .ensure_loop_running(topic, &tenant_id, state.config.breaker_config());
    }

    let session = PushSession {
        connection_id,
        tenant_id,
        topic: topics.join(","),
        state: state.clone(),
        hb: Instant::now(),
        credential_expires_at,
    };

    // `ws::start` alone discards the actor's address; this session needs it
    // to bridge the registry's outbound queue (a plain tokio mpsc receiver,
    // not something the actor can await directly inside its own context)
    // onto `ctx.text()` calls.
    let (addr, resp) = ws::WsResponseBuilder::new(session, &req, stream).start_with_addr()?;
    tokio::spawn(bridge_receiver(addr.clone(), registered.receiver));
    tokio::spawn(bridge_close_signal(addr, registered.close_notify));

    Ok(resp)
}

async fn bridge_receiver(
    addr: actix::Addr<PushSession>,
    mut receiver: tokio::sync::mpsc::Receiver<EventEnvelope>,
) {
    while let Some(envelope) = receiver.recv().await {
        if addr.try_send(Push(envelope)).is_err() {
            break;
        }
    }
}

/// Waits on the registry's forced-close signal for this connection and, once
/// raised, tells the actor to actually close the wire connection -- a
/// background overflow-disconnect only flips `ConnectionRecord::alive`, which
/// this bridges into a real close frame.
async fn bridge_close_signal(addr: actix::Addr<PushSession>, close_notify: std::sync::Arc<tokio::sync::Notify>) {
    close_notify.notified().await;
    let _ = addr.try_send(Overflow);
}
