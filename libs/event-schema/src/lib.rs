//! Canonical event envelope and schema registry.
//!
//! The envelope is the stable wire contract shared by the outbox, the stream
//! bus and the push endpoints (§3). The registry validates payloads against
//! a schema addressed by `(event_type, schema_version)`, loaded once at
//! startup rather than populated by import-time side effects.

mod envelope;
mod error;
mod registry;

pub use envelope::EventEnvelope;
pub use error::SchemaError;
pub use registry::{OrderCreatedV1, PayloadSchema, SchemaRegistry};
