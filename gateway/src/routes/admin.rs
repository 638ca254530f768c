//! Operator surface (§11): dead-letter inspection/reprocessing and
//! registry/circuit introspection. Not tenant-scoped; deployments are
//! expected to put this behind a separate network boundary or an
//! operator-only auth layer, same as the teacher's own admin routes.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::ApiError;
use error_types::ServiceError;

#[derive(Debug, Deserialize)]
pub struct DlqListParams {
    pub topic: String,
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    100
}

pub async fn list_dlq(
    query: web::Query<DlqListParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let entries = state
        .dlq
        .list(&query.topic, query.count)
        .await
        .map_err(|e| ServiceError::Transient(e.to_string()))?;
    Ok(HttpResponse::Ok().json(entries
        .into_iter()
        .map(|e| {
            serde_json::json!({
                "dlq_id": e.dlq_id,
                "topic": e.topic,
                "event_id": e.envelope.event_id,
                "event_type": e.envelope.event_type,
                "tenant_id": e.envelope.tenant_id,
                "reason": e.reason,
            })
        })
        .collect::<Vec<_>>()))
}

#[derive(Debug, Deserialize)]
pub struct ReprocessRequest {
    pub topic: String,
    pub dlq_id: String,
    /// Replacement payload to validate and re-append instead of the
    /// originally stored (poison) payload -- the operator's fix for a
    /// schema-validation failure discovered at read time.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

pub async fn reprocess_dlq(
    body: web::Json<ReprocessRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state
        .dlq
        .reprocess_one(&body.topic, &body.dlq_id, body.payload.clone())
        .await
        .map_err(ServiceError::from)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"reprocessed": body.dlq_id})))
}

pub async fn registry_stats(state: web::Data<AppState>) -> HttpResponse {
    let stats = state.registry.stats();
    HttpResponse::Ok().json(serde_json::json!({
        "total_connections": stats.total_connections,
        "tenants": stats.tenants,
        "running_dispatch_loops": state.dispatcher.running_loop_count(),
    }))
}

pub async fn open_circuit(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    let name = path.into_inner();
    match state.dispatcher.breaker(&name) {
        Some(breaker) => {
            breaker.force_open();
            HttpResponse::Ok().json(serde_json::json!({"circuit": name, "state": "open"}))
        }
        None => HttpResponse::NotFound()
            .json(serde_json::json!({"error": format!("no breaker has run for topic {name}")})),
    }
}

pub async fn close_circuit(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    let name = path.into_inner();
    match state.dispatcher.breaker(&name) {
        Some(breaker) => {
            breaker.force_close();
            HttpResponse::Ok().json(serde_json::json!({"circuit": name, "state": "closed"}))
        }
        None => HttpResponse::NotFound()
            .json(serde_json::json!({"error": format!("no breaker has run for topic {name}")})),
    }
}
