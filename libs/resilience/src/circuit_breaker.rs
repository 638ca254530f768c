//! Circuit breaker with sliding-window failure-ratio tripping.
//!
//! State transitions:
//! - Closed -> Open: rolling failure ratio exceeds `failure_ratio` over at
//!   least `min_samples` calls in the window.
//! - Open -> HalfOpen: after `cool_down` elapses.
//! - HalfOpen -> Closed: `success_threshold` consecutive probe successes.
//! - HalfOpen -> Open: any probe failure.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Fraction of failures in the window that trips the breaker.
    pub failure_ratio: f64,
    /// Minimum calls observed in the window before the ratio is evaluated.
    pub min_samples: usize,
    /// How long the window looks back for sample retention purposes (the
    /// window itself is count-bounded; this is kept for documentation of the
    /// default configuration, "...in the last 30s").
    pub window: Duration,
    /// Consecutive probe successes required in HalfOpen to close.
    pub success_threshold: u32,
    /// Duration to wait before Open -> HalfOpen.
    pub cool_down: Duration,
    /// Concurrent probes allowed through while HalfOpen; calls beyond this
    /// quota fail fast rather than joining the probe.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            min_samples: 20,
            window: Duration::from_secs(30),
            success_threshold: 1,
            cool_down: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitBreakerState>>,
}

struct CircuitBreakerState {
    current: CircuitState,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    /// Sliding window: true = success, false = failure.
    window: VecDeque<bool>,
    /// Probes currently in flight while HalfOpen, bounded by
    /// `half_open_max_probes`.
    half_open_inflight: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker is open - failing fast")]
    Open,
    #[error("call failed: {0}")]
    CallFailed(String),
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(CircuitBreakerState {
                current: CircuitState::Closed,
                consecutive_successes: 0,
                opened_at: None,
                window: VecDeque::with_capacity(config.min_samples * 2),
                half_open_inflight: 0,
            })),
            config,
        }
    }

    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if self.should_reject_call() {
            return Err(CircuitBreakerError::Open);
        }

        match f().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::CallFailed(e.to_string()))
            }
        }
    }

    fn should_reject_call(&self) -> bool {
        let mut state = self.state.write();
        match state.current {
            CircuitState::Open => {
                if let Some(opened_at) = state.opened_at {
                    if opened_at.elapsed() >= self.config.cool_down {
                        info!("circuit breaker: Open -> HalfOpen");
                        state.current = CircuitState::HalfOpen;
                        state.consecutive_successes = 0;
                        state.half_open_inflight = 1;
                        false
                    } else {
                        true
                    }
                } else {
                    true
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_inflight >= self.config.half_open_max_probes {
                    true
                } else {
                    state.half_open_inflight += 1;
                    false
                }
            }
            CircuitState::Closed => false,
        }
    }

    fn record_success(&self) {
        let mut state = self.state.write();
        state.consecutive_successes += 1;
        self.add_to_window(&mut state, true);

        if state.current == CircuitState::HalfOpen {
            state.half_open_inflight = state.half_open_inflight.saturating_sub(1);
            if state.consecutive_successes >= self.config.success_threshold {
                info!("circuit breaker: HalfOpen -> Closed");
                state.current = CircuitState::Closed;
                state.window.clear();
                state.half_open_inflight = 0;
            }
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.write();
        state.consecutive_successes = 0;
        self.add_to_window(&mut state, false);

        match state.current {
            CircuitState::Closed => {
                let error_rate = Self::error_rate_of(&state.window);
                if state.window.len() >= self.config.min_samples
                    && error_rate >= self.config.failure_ratio
                {
                    warn!(
                        error_rate = error_rate,
                        samples = state.window.len(),
                        "circuit breaker: Closed -> Open"
                    );
                    state.current = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker: HalfOpen -> Open (probe failed)");
                state.current = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.half_open_inflight = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn add_to_window(&self, state: &mut CircuitBreakerState, success: bool) {
        if state.window.len() >= self.config.min_samples.max(1) * 2 {
            state.window.pop_front();
        }
        state.window.push_back(success);
    }

    fn error_rate_of(window: &VecDeque<bool>) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        let failures = window.iter().filter(|&&ok| !ok).count();
        failures as f64 / window.len() as f64
    }

    pub fn state(&self) -> CircuitState {
        self.state.read().current
    }

    /// Operator override: forces the breaker open regardless of the
    /// observed failure ratio, until `force_close` or a later automatic
    /// transition clears it.
    pub fn force_open(&self) {
        let mut state = self.state.write();
        state.current = CircuitState::Open;
        state.opened_at = Some(Instant::now());
        warn!("circuit breaker: forced open by operator");
    }

    /// Operator override: closes the breaker and clears its window,
    /// regardless of recent failures.
    pub fn force_close(&self) {
        let mut state = self.state.write();
        state.current = CircuitState::Closed;
        state.opened_at = None;
        state.consecutive_successes = 0;
        state.window.clear();
        state.half_open_inflight = 0;
        info!("circuit breaker: forced closed by operator");
    }

    pub fn error_rate(&self) -> f64 {
        Self::error_rate_of(&self.state.read().window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trips_on_failure_ratio_over_min_samples() {
        let config = CircuitBreakerConfig {
            min_samples: 20,
            failure_ratio: 0.5,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        for _ in 0..15 {
            let _ = cb.call(|| async { Err::<(), _>("boom") }).await;
        }
        for _ in 0..10 {
            let _ = cb.call(|| async { Ok::<_, String>(()) }).await;
        }

        assert_eq!(cb.state(), CircuitState::Open);
        let result = cb.call(|| async { Ok::<_, String>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn does_not_trip_below_min_samples() {
        let config = CircuitBreakerConfig {
            min_samples: 20,
            failure_ratio: 0.5,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        for _ in 0..5 {
            let _ = cb.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_transitions_to_half_open_after_cool_down() {
        let config = CircuitBreakerConfig {
            min_samples: 2,
            failure_ratio: 0.5,
            cool_down: Duration::from_millis(50),
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let _ = cb.call(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let config = CircuitBreakerConfig {
            min_samples: 2,
            failure_ratio: 0.5,
            cool_down: Duration::from_millis(50),
            success_threshold: 2,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        for _ in 0..2 {
            let _ = cb.call(|| async { Ok::<_, String>(()) }).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_reopens_on_probe_failure() {
        let config = CircuitBreakerConfig {
            min_samples: 2,
            failure_ratio: 0.5,
            cool_down: Duration::from_millis(50),
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let _ = cb.call(|| async { Err::<(), _>("still broken") }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
