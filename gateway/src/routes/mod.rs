pub mod admin;
pub mod stream;
pub mod ws;

use actix_web::web;

use crate::metrics;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/stream", web::get().to(stream::stream_handler_all))
        .route("/stream/{topic}", web::get().to(stream::stream_handler))
        .route("/ws", web::get().to(ws::ws_handler_all))
        .route("/ws/{topic}", web::get().to(ws::ws_handler))
        .route("/admin/dlq", web::get().to(admin::list_dlq))
        .route("/admin/dlq/reprocess", web::post().to(admin::reprocess_dlq))
        .route("/admin/registry/stats", web::get().to(admin::registry_stats))
        .route(
            "/admin/circuit/{name}/open",
            web::post().to(admin::open_circuit),
        )
        .route(
            "/admin/circuit/{name}/close",
            web::post().to(admin::close_circuit),
        )
        .route("/metrics", web::get().to(metrics::serve_metrics))
        .route("/healthz", web::get().to(metrics::healthz));
}
