//! Postgres connection pool construction and metrics, shared by the outbox
//! writer/reader and the gateway.

mod metrics;

pub use metrics::{acquire_with_metrics, update_pool_metrics};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

#[derive(Clone)]
pub struct DbConfig {
    pub service_name: String,
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("service_name", &self.service_name)
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            service_name: "event-gateway".to_string(),
            database_url: String::new(),
            max_connections: 20,
            min_connections: 5,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl DbConfig {
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let mut cfg = Self {
            service_name: service_name.into(),
            ..Default::default()
        };
        if let Ok(url) = std::env::var("DATABASE_URL") {
            cfg.database_url = url;
        }
        if let Ok(v) = std::env::var("DB_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                cfg.max_connections = n;
            }
        }
        cfg
    }

    /// This crate is a single service, unlike the monorepo this pattern was
    /// learned from where `for_service` allocated a shared connection budget
    /// across a dozen services. Kept as a named entry point so call sites
    /// read the same way; it just applies this service's own defaults.
    pub fn for_service(service_name: &str) -> Self {
        Self::from_env(service_name)
    }
}

pub async fn create_pool(cfg: DbConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .min_connections(cfg.min_connections)
        .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(cfg.max_lifetime_secs))
        .connect(&cfg.database_url)
        .await
}
