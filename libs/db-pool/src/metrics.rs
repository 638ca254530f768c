//! Prometheus metrics for the database connection pool: size, acquisition
//! latency, and errors.

use once_cell::sync::Lazy;
use prometheus::{HistogramVec, IntGaugeVec};
use sqlx::{pool::PoolConnection, PgPool, Postgres};
use std::time::Instant;

static DB_POOL_CONNECTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        prometheus::Opts::new(
            "db_pool_connections",
            "Database pool connection count by state",
        ),
        &["service", "state"],
    )
    .expect("failed to create db_pool_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register db_pool_connections");
    gauge
});

static DB_POOL_ACQUIRE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "db_pool_acquire_duration_seconds",
            "Time to acquire a connection from the pool",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        &["service"],
    )
    .expect("failed to create db_pool_acquire_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register db_pool_acquire_duration_seconds");
    histogram
});

pub fn update_pool_metrics(pool: &PgPool, service: &str) {
    let size = pool.size() as i64;
    let idle = pool.num_idle() as i64;
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(size - idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "max"])
        .set(pool.options().get_max_connections() as i64);
}

pub async fn acquire_with_metrics(
    pool: &PgPool,
    service: &str,
) -> Result<PoolConnection<Postgres>, sqlx::Error> {
    let start = Instant::now();
    let result = pool.acquire().await;
    DB_POOL_ACQUIRE_DURATION
        .with_label_values(&[service])
        .observe(start.elapsed().as_secs_f64());
    if result.is_err() {
        tracing::warn!(service, "failed to acquire database connection");
    }
    result
}
