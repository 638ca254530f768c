use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub outbox: OutboxConfig,
    pub retry: RetryConfig,
    pub push: PushConfig,
    pub dispatcher: DispatcherConfig,
    pub breaker: BreakerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
    pub product: String,
    pub auth_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub visibility_timeout_secs: i64,
    pub max_attempts: i32,
    /// How long a processed outbox row, a consumed stream entry, and a
    /// recorded `processed_events` dedup row are kept before the retention
    /// sweep deletes them. One shared value across all three, per §9's
    /// resolution that they track together.
    pub retention_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    DropOldest,
    Disconnect,
    Block,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    BestEffort,
    AllConnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub heartbeat_seconds_general: u64,
    pub heartbeat_seconds_orders: u64,
    pub heartbeat_seconds_notifications: u64,
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub ack_policy: AckPolicy,
    pub idle_shutdown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_ratio: f64,
    pub min_samples: usize,
    pub cool_down_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let overflow_policy = match std::env::var("PUSH_OVERFLOW_POLICY")
            .unwrap_or_else(|_| "disconnect".to_string())
            .as_str()
        {
            "drop_oldest" => OverflowPolicy::DropOldest,
            "block" => OverflowPolicy::Block,
            _ => OverflowPolicy::Disconnect,
        };
        let ack_policy = match std::env::var("DISPATCHER_ACK_POLICY")
            .unwrap_or_else(|_| "best_effort".to_string())
            .as_str()
        {
            "all_connected" => AckPolicy::AllConnected,
            _ => AckPolicy::BestEffort,
        };

        // `block` only applies backpressure safely when every currently
        // connected subscriber is guaranteed to be drained before ack, i.e.
        // ack_policy = all_connected (§4.5).
        if overflow_policy == OverflowPolicy::Block && ack_policy != AckPolicy::AllConnected {
            return Err("PUSH_OVERFLOW_POLICY=block requires DISPATCHER_ACK_POLICY=all_connected".into());
        }

        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                port: std::env::var("APP_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()?,
                product: std::env::var("PRODUCT_NAME").unwrap_or_else(|_| "acme".to_string()),
                auth_secret: std::env::var("AUTH_JWT_SECRET")?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            outbox: OutboxConfig {
                poll_interval_ms: env_or("OUTBOX_POLL_INTERVAL_MS", 100)?,
                batch_size: env_or("OUTBOX_BATCH_SIZE", 100)?,
                visibility_timeout_secs: env_or("OUTBOX_VISIBILITY_TIMEOUT_SECS", 30)?,
                max_attempts: env_or("OUTBOX_MAX_ATTEMPTS", 8)?,
                retention_hours: env_or("RETENTION_HOURS", 24)?,
            },
            retry: RetryConfig {
                base_ms: env_or("RETRY_BASE_MS", 1000)?,
                cap_ms: env_or("RETRY_CAP_MS", 60_000)?,
            },
            push: PushConfig {
                heartbeat_seconds_general: env_or("PUSH_HEARTBEAT_SECONDS_GENERAL", 30)?,
                heartbeat_seconds_orders: env_or("PUSH_HEARTBEAT_SECONDS_ORDERS", 45)?,
                heartbeat_seconds_notifications: env_or(
                    "PUSH_HEARTBEAT_SECONDS_NOTIFICATIONS",
                    60,
                )?,
                queue_capacity: env_or("PUSH_QUEUE_CAPACITY", 256)?,
                overflow_policy,
            },
            dispatcher: DispatcherConfig {
                ack_policy,
                idle_shutdown_secs: env_or("DISPATCHER_IDLE_SHUTDOWN_SECS", 300)?,
            },
            breaker: BreakerConfig {
                failure_ratio: env_or("BREAKER_FAILURE_RATIO", 0.5)?,
                min_samples: env_or("BREAKER_MIN_SAMPLES", 20)?,
                cool_down_secs: env_or("BREAKER_COOL_DOWN_SECS", 30)?,
            },
        })
    }
}

impl Config {
    pub fn auth_secret(&self) -> String {
        self.app.auth_secret.clone()
    }

    pub fn breaker_config(&self) -> resilience::circuit_breaker::CircuitBreakerConfig {
        resilience::circuit_breaker::CircuitBreakerConfig {
            failure_ratio: self.breaker.failure_ratio,
            min_samples: self.breaker.min_samples,
            cool_down: Duration::from_secs(self.breaker.cool_down_secs),
            ..Default::default()
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|e: T::Err| e.to_string().into()),
        Err(_) => Ok(default),
    }
}
