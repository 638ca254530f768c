use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use event_gateway::app_state::AppState;
use event_gateway::config::Config;
use event_gateway::dispatcher::Dispatcher;
use event_gateway::registry::ConnectionRegistry;
use event_gateway::routes;
use event_schema::SchemaRegistry;
use tokio::sync::watch;

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::from_env()?;
    tracing::info!(env = %cfg.app.env, product = %cfg.app.product, "starting event gateway");

    let db = db_pool::create_pool(db_pool::DbConfig {
        service_name: "event-gateway".to_string(),
        database_url: cfg.database.url.clone(),
        max_connections: cfg.database.max_connections,
        ..db_pool::DbConfig::default()
    })
    .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let bus = Arc::new(
        resilience::with_retry(
            resilience::RetryConfig {
                max_attempts: 5,
                base: std::time::Duration::from_millis(cfg.retry.base_ms),
                cap: std::time::Duration::from_millis(cfg.retry.cap_ms),
            },
            || stream_bus::RedisStreamBus::connect(&cfg.redis.url, cfg.app.product.clone()),
        )
        .await
        .map_err(|e| format!("failed to connect to stream bus after retries: {e}"))?,
    );

    let mut schema_registry = SchemaRegistry::new();
    schema_registry.register(Arc::new(event_schema::OrderCreatedV1));
    let schemas = Arc::new(schema_registry);
    let schemas_for_dlq = schemas.clone();

    let outbox_repository = Arc::new(outbox::SqlxOutboxRepository::new(db.clone()));
    let outbox_repository_for_sweep = outbox_repository.clone();
    let outbox_processor = outbox::OutboxProcessor::new(
        outbox_repository,
        bus.clone(),
        schemas,
        outbox::OutboxProcessorConfig {
            worker_id: format!("{}-outbox-0", cfg.app.product),
            poll_interval: std::time::Duration::from_millis(cfg.outbox.poll_interval_ms),
            batch_size: cfg.outbox.batch_size,
            visibility_timeout: chrono::Duration::seconds(cfg.outbox.visibility_timeout_secs),
            max_attempts: cfg.outbox.max_attempts,
            retry: resilience::RetryConfig {
                max_attempts: cfg.outbox.max_attempts as u32,
                base: std::time::Duration::from_millis(cfg.retry.base_ms),
                cap: std::time::Duration::from_millis(cfg.retry.cap_ms),
            },
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention_shutdown_rx = shutdown_rx.clone();
    let outbox_handle = tokio::spawn(async move {
        outbox_processor.start(shutdown_rx).await;
    });

    let idempotency = Arc::new(idempotency::IdempotencyGuard::new(
        db.clone(),
        chrono::Duration::hours(cfg.outbox.retention_hours),
    ));

    let registry = Arc::new(ConnectionRegistry::new(
        cfg.push.queue_capacity,
        cfg.push.overflow_policy,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        bus.clone(),
        registry.clone(),
        cfg.dispatcher.clone(),
        format!("{}-gateway-0", cfg.app.product),
        idempotency.clone(),
    ));
    let dlq = Arc::new(dead_letter::DlqManager::new(
        bus.clone(),
        schemas_for_dlq,
        dead_letter::AlertThresholds::default(),
    ));

    let retention_handle = tokio::spawn(run_retention_sweep(
        outbox_repository_for_sweep,
        bus.clone(),
        idempotency.clone(),
        cfg.outbox.retention_hours,
        db.clone(),
        retention_shutdown_rx,
    ));

    let state = web::Data::new(AppState {
        config: cfg.clone(),
        db,
        registry,
        dispatcher,
        dlq,
    });
    let config_data = web::Data::new(cfg.clone());

    let bind_addr = format!("0.0.0.0:{}", cfg.app.port);
    tracing::info!(%bind_addr, "listening");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(config_data.clone())
            .wrap(event_gateway::metrics::MetricsMiddleware)
            .configure(routes::configure)
    })
    .bind(&bind_addr)?
    .run();

    tokio::select! {
        res = server => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    }

    let _ = outbox_handle.await;
    let _ = retention_handle.await;
    Ok(())
}

/// Sweeps processed outbox rows, trims the stream bus, and clears expired
/// idempotency markers on one shared retention window (§9 resolution #2).
async fn run_retention_sweep(
    outbox_repository: Arc<outbox::SqlxOutboxRepository>,
    bus: Arc<stream_bus::RedisStreamBus>,
    idempotency: Arc<idempotency::IdempotencyGuard>,
    retention_hours: i64,
    db: sqlx::PgPool,
    mut shutdown: watch::Receiver<bool>,
) {
    use outbox::OutboxRepository;

    let interval = std::time::Duration::from_secs(3600);
    let max_age = std::time::Duration::from_secs(retention_hours.max(0) as u64 * 3600);
    let retention = chrono::Duration::hours(retention_hours);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("retention sweep shutting down");
                    return;
                }
            }
        }

        db_pool::update_pool_metrics(&db, "event-gateway");

        match outbox_repository.sweep_processed(retention).await {
            Ok(n) if n > 0 => tracing::info!(rows = n, "swept processed outbox rows"),
            Ok(_) => {}
            Err(e) => tracing::warn!("outbox sweep failed: {e}"),
        }

        for topic in event_gateway::dispatcher::known_topics().into_keys() {
            if let Err(e) = bus.trim(topic, max_age).await {
                tracing::warn!(topic, "stream trim failed: {e}");
            }
        }

        match idempotency.cleanup_old_events().await {
            Ok(n) if n > 0 => tracing::info!(rows = n, "swept idempotency markers"),
            Ok(_) => {}
            Err(e) => tracing::warn!("idempotency cleanup failed: {e}"),
        }
    }
}
