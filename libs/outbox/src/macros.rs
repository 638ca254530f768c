/// Appends an event to the outbox inline inside an already-open transaction,
/// without constructing an `EventEnvelope` by hand at the call site.
///
/// ```ignore
/// publish_event!(writer, &mut tx, "order_created", 1, &tenant_id, &order_id, "orders-service", payload)?;
/// ```
#[macro_export]
macro_rules! publish_event {
    ($writer:expr, $tx:expr, $event_type:expr, $schema_version:expr, $tenant_id:expr, $aggregate_id:expr, $producer:expr, $payload:expr) => {{
        let envelope = ::event_schema::EventEnvelope::new(
            $event_type,
            $schema_version,
            $tenant_id,
            $aggregate_id,
            $producer,
            $payload,
        );
        $writer.append($tx, &envelope).await
    }};
}

/// Same as [`publish_event!`] but attaches a correlating `trace_id`.
#[macro_export]
macro_rules! publish_event_with_trace {
    ($writer:expr, $tx:expr, $event_type:expr, $schema_version:expr, $tenant_id:expr, $aggregate_id:expr, $producer:expr, $payload:expr, $trace_id:expr) => {{
        let envelope = ::event_schema::EventEnvelope::new(
            $event_type,
            $schema_version,
            $tenant_id,
            $aggregate_id,
            $producer,
            $payload,
        )
        .with_trace_id($trace_id);
        $writer.append($tx, &envelope).await
    }};
}
