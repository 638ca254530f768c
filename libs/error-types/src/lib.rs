//! Unified error surface shared across the event delivery core.
//!
//! Every library in the workspace keeps its own `thiserror` enum for its
//! local failure modes and converts into [`ServiceError`] at the boundary
//! where an error becomes visible to a caller, an HTTP response, or the DLQ.

use serde::Serialize;

/// The six error kinds the reliable-delivery core distinguishes. See
/// the component design notes for which layer is expected to produce each.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// Envelope or schema mismatch; never retried at this layer.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Database/bus unavailable, timeout, or a transient dependency failure.
    /// Recovered locally by the caller (retry, claim expiry) and should not
    /// normally reach an external client.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retries exhausted, poison payload, or a schema evolution conflict.
    /// Routed to the DLQ with a reason; visible in metrics.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Duplicate event_id, missing transaction, unauthorized handshake.
    #[error("contract violation: {0}")]
    Contract(String),

    /// Outbound queue full; the caller's overflow policy decides what happens.
    #[error("overflow: {0}")]
    Overflow(String),

    /// Downstream isolated by a circuit breaker; not retried inside the breaker.
    #[error("circuit open: {0}")]
    CircuitOpen(String),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::Transient(_) => 503,
            ServiceError::Permanent(_) => 422,
            ServiceError::Contract(_) => 409,
            ServiceError::Overflow(_) => 429,
            ServiceError::CircuitOpen(_) => 503,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::Transient(_) => "TRANSIENT_ERROR",
            ServiceError::Permanent(_) => "PERMANENT_ERROR",
            ServiceError::Contract(_) => "CONTRACT_ERROR",
            ServiceError::Overflow(_) => "OVERFLOW",
            ServiceError::CircuitOpen(_) => "CIRCUIT_OPEN",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code().to_string(),
            message: self.to_string(),
            status: self.status_code(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    pub timestamp: String,
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ServiceError::Contract("row not found".to_string()),
            other => ServiceError::Transient(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_kind() {
        assert_eq!(ServiceError::Validation("x".into()).status_code(), 400);
        assert_eq!(ServiceError::Overflow("x".into()).status_code(), 429);
        assert_eq!(ServiceError::CircuitOpen("x".into()).status_code(), 503);
    }

    #[test]
    fn response_carries_error_code() {
        let resp = ServiceError::Contract("dup event_id".into()).to_response();
        assert_eq!(resp.error, "CONTRACT_ERROR");
        assert_eq!(resp.status, 409);
    }
}
