use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::SchemaError;

/// A validator for one `(event_type, schema_version)` pair. Implementations
/// are registered at startup — no import-time registration side effects, per
/// the design note that decorator/metaclass-style registration becomes an
/// explicit registry populated by configuration.
pub trait PayloadSchema: Send + Sync {
    fn event_type(&self) -> &str;
    fn schema_version(&self) -> u32;
    fn validate(&self, payload: &Value) -> Result<(), String>;
}

/// Schema documents addressed by `(event_type, schema_version)`, loaded once
/// at startup and consulted by the outbox reader before publishing
/// (write-path) and by the dispatcher when deciding whether an unknown type
/// should be logged and forwarded untouched (read-path).
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: HashMap<(String, u32), Arc<dyn PayloadSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    pub fn register(&mut self, schema: Arc<dyn PayloadSchema>) {
        let key = (schema.event_type().to_string(), schema.schema_version());
        self.schemas.insert(key, schema);
    }

    /// Unknown on write is rejected (§6).
    pub fn validate(
        &self,
        event_type: &str,
        schema_version: u32,
        payload: &Value,
    ) -> Result<(), SchemaError> {
        let key = (event_type.to_string(), schema_version);
        let schema = self
            .schemas
            .get(&key)
            .ok_or_else(|| SchemaError::UnknownVersion {
                event_type: event_type.to_string(),
                version: schema_version,
            })?;
        schema
            .validate(payload)
            .map_err(|reason| SchemaError::ValidationFailed {
                event_type: event_type.to_string(),
                reason,
            })
    }

    /// Unknown event types on read are logged and forwarded untouched rather
    /// than rejected — this lets the dispatcher decide that without
    /// re-running full validation.
    pub fn is_known(&self, event_type: &str, schema_version: u32) -> bool {
        self.schemas
            .contains_key(&(event_type.to_string(), schema_version))
    }
}

/// Schema for `order_created v1`, matching the example in the external
/// interfaces section: `{ items:[{sku,quantity}], total_minor_units, currency }`.
pub struct OrderCreatedV1;

impl PayloadSchema for OrderCreatedV1 {
    fn event_type(&self) -> &str {
        "order_created"
    }

    fn schema_version(&self) -> u32 {
        1
    }

    fn validate(&self, payload: &Value) -> Result<(), String> {
        let obj = payload.as_object().ok_or("payload must be a JSON object")?;

        let items = obj
            .get("items")
            .and_then(Value::as_array)
            .ok_or("missing 'items' array")?;
        if items.is_empty() {
            return Err("'items' must not be empty".to_string());
        }
        for item in items {
            let item = item.as_object().ok_or("each item must be an object")?;
            if !item.get("sku").is_some_and(Value::is_string) {
                return Err("item missing string 'sku'".to_string());
            }
            if !item.get("quantity").is_some_and(Value::is_u64) {
                return Err("item missing non-negative integer 'quantity'".to_string());
            }
        }

        if !obj
            .get("total_minor_units")
            .is_some_and(Value::is_number)
        {
            return Err("missing numeric 'total_minor_units'".to_string());
        }
        if !obj.get("currency").is_some_and(Value::is_string) {
            return Err("missing string 'currency'".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut r = SchemaRegistry::new();
        r.register(Arc::new(OrderCreatedV1));
        r
    }

    #[test]
    fn accepts_well_formed_order_created() {
        let r = registry();
        let payload = json!({
            "items": [{"sku": "ABC", "quantity": 2}],
            "total_minor_units": 2998,
            "currency": "USD"
        });
        assert!(r.validate("order_created", 1, &payload).is_ok());
    }

    #[test]
    fn rejects_missing_items() {
        let r = registry();
        let payload = json!({"total_minor_units": 2998, "currency": "USD"});
        assert!(r.validate("order_created", 1, &payload).is_err());
    }

    #[test]
    fn rejects_unknown_event_type_on_write() {
        let r = registry();
        let err = r.validate("unknown_event", 1, &json!({})).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownVersion { .. }));
    }

    #[test]
    fn is_known_used_for_read_path_logging_decision() {
        let r = registry();
        assert!(r.is_known("order_created", 1));
        assert!(!r.is_known("order_created", 2));
    }
}
