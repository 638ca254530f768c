//! Resilience primitives shared by every caller of a flaky downstream: the
//! outbox reader's bus append, the dispatcher's stream-bus read/ack, and
//! handler tasks in the gateway.
//!
//! ```no_run
//! # use resilience::{CircuitBreaker, CircuitBreakerConfig};
//! # async fn example() {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//! let _ = breaker.call(|| async { Ok::<_, String>(()) }).await;
//! # }
//! ```

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use retry::{backoff_for_attempt, with_retry, RetryConfig, RetryError};
