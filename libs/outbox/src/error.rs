use error_types::ServiceError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("row for event {0} not found")]
    RowNotFound(Uuid),

    #[error("no live transaction supplied for append")]
    TransactionRequired,

    #[error("duplicate event_id {0}")]
    DuplicateEvent(Uuid),

    #[error("schema validation failed: {0}")]
    ValidationError(#[from] event_schema::SchemaError),

    #[error("stream bus rejected publish: {0}")]
    PublishFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type OutboxResult<T> = Result<T, OutboxError>;

impl From<OutboxError> for ServiceError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::ValidationError(_) => ServiceError::Validation(err.to_string()),
            OutboxError::DuplicateEvent(_) | OutboxError::TransactionRequired => {
                ServiceError::Contract(err.to_string())
            }
            OutboxError::Database(_) | OutboxError::PublishFailed(_) => {
                ServiceError::Transient(err.to_string())
            }
            OutboxError::RowNotFound(_) | OutboxError::Serialization(_) => {
                ServiceError::Permanent(err.to_string())
            }
        }
    }
}
