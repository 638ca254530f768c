//! Transactional outbox: writer (§4.1) and reader/processor (§4.2).

pub mod error;
pub mod macros;
pub mod metrics;
pub mod model;
pub mod processor;
pub mod repository;
pub mod writer;

pub use error::{OutboxError, OutboxResult};
pub use metrics::OutboxMetrics;
pub use model::OutboxRow;
pub use processor::{OutboxProcessor, OutboxProcessorConfig};
pub use repository::{OutboxRepository, SqlxOutboxRepository};
pub use writer::OutboxWriter;
