use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    TextEncoder,
};

pub static EVENTS_CONSUMED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("events_consumed_total", "Envelopes delivered to a connection")
        .expect("failed to create events_consumed_total");
    prometheus::default_registry()
        .register(Box::new(c.clone()))
        .expect("failed to register events_consumed_total");
    c
});

pub static CONNECTIONS_OPEN: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("connections_open", "Currently live push connections")
        .expect("failed to create connections_open");
    prometheus::default_registry()
        .register(Box::new(g.clone()))
        .expect("failed to register connections_open");
    g
});

pub static STREAM_CONSUMER_LAG: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("stream_consumer_lag", "Pending entries per consumer group"),
        &["tenant_id", "topic"],
    )
    .expect("failed to create stream_consumer_lag");
    prometheus::default_registry()
        .register(Box::new(g.clone()))
        .expect("failed to register stream_consumer_lag");
    g
});

pub static CIRCUIT_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    let g = IntGaugeVec::new(
        Opts::new("circuit_state", "0=Closed 1=HalfOpen 2=Open"),
        &["name"],
    )
    .expect("failed to create circuit_state");
    prometheus::default_registry()
        .register(Box::new(g.clone()))
        .expect("failed to register circuit_state");
    g
});

pub static PUSH_QUEUE_DEPTH: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        HistogramOpts::new("push_queue_depth", "Outbound queue depth at enqueue time")
            .buckets(vec![1.0, 4.0, 16.0, 64.0, 128.0, 192.0, 256.0]),
        &["protocol"],
    )
    .expect("failed to create push_queue_depth");
    prometheus::default_registry()
        .register(Box::new(h.clone()))
        .expect("failed to register push_queue_depth");
    h
});

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("gateway_http_requests_total", "Total HTTP requests handled"),
        &["method", "path", "status"],
    )
    .expect("failed to create gateway_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(c.clone()))
        .expect("failed to register gateway_http_requests_total");
    c
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        HistogramOpts::new(
            "gateway_http_request_duration_seconds",
            "HTTP request latency",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "path", "status"],
    )
    .expect("failed to create gateway_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(h.clone()))
        .expect("failed to register gateway_http_request_duration_seconds");
    h
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: std::time::Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

/// Logs method/path/status at debug and feeds the request-latency histogram,
/// the way `notification-service`'s own `MetricsMiddleware` does.
pub struct MetricsMiddleware;

impl<S, B> actix_web::dev::Transform<S, actix_web::dev::ServiceRequest> for MetricsMiddleware
where
    S: actix_web::dev::Service<
            actix_web::dev::ServiceRequest,
            Response = actix_web::dev::ServiceResponse<B>,
            Error = actix_web::Error,
        > + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(MetricsMiddlewareService {
            service: std::rc::Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: std::rc::Rc<S>,
}

impl<S, B> actix_web::dev::Service<actix_web::dev::ServiceRequest> for MetricsMiddlewareService<S>
where
    S: actix_web::dev::Service<
            actix_web::dev::ServiceRequest,
            Response = actix_web::dev::ServiceResponse<B>,
            Error = actix_web::Error,
        > + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = futures::future::LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    actix_web::dev::forward_ready!(service);

    fn call(&self, req: actix_web::dev::ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let path = req.path().to_string();
        let method = req.method().to_string();
        let start = std::time::Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start.elapsed();
            match &result {
                Ok(response) => {
                    observe_http_request(&method, &path, response.status().as_u16(), elapsed);
                    tracing::debug!(%method, %path, status = response.status().as_u16(), ?elapsed, "request handled");
                }
                Err(e) => {
                    observe_http_request(&method, &path, 500, elapsed);
                    tracing::debug!(%method, %path, error = %e, ?elapsed, "request failed");
                }
            }
            result
        })
    }
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Reports healthy only once the DB pool and stream bus have both answered a
/// ping, rather than unconditionally returning 200 -- a liveness probe that
/// can't see dependency outages isn't worth much, matching the teacher's own
/// connect-or-log-degraded bootstrap logging in `main.rs`.
pub async fn healthz(state: actix_web::web::Data<crate::app_state::AppState>) -> HttpResponse {
    let db_ok = match db_pool::acquire_with_metrics(&state.db, "event-gateway").await {
        Ok(mut conn) => sqlx::query("SELECT 1").execute(&mut *conn).await.is_ok(),
        Err(_) => false,
    };
    let bus_ok = state.dispatcher.bus_is_reachable().await;

    if db_ok && bus_ok {
        HttpResponse::Ok().json(serde_json::json!({"status": "ok", "db": db_ok, "bus": bus_ok}))
    } else {
        HttpResponse::ServiceUnavailable()
            .json(serde_json::json!({"status": "degraded", "db": db_ok, "bus": bus_ok}))
    }
}
