use error_types::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("no schema registered for event type '{0}'")]
    UnknownEventType(String),

    #[error("no schema registered for '{event_type}' version {version}")]
    UnknownVersion { event_type: String, version: u32 },

    #[error("payload for '{event_type}' failed validation: {reason}")]
    ValidationFailed { event_type: String, reason: String },
}

impl From<SchemaError> for ServiceError {
    fn from(err: SchemaError) -> Self {
        ServiceError::Validation(err.to_string())
    }
}
