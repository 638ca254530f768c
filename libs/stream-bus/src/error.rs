use error_types::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum StreamBusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("entry not found: {0}")]
    NotFound(String),
}

impl From<StreamBusError> for ServiceError {
    fn from(err: StreamBusError) -> Self {
        ServiceError::Transient(err.to_string())
    }
}
