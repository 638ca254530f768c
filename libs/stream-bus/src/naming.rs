/// `{product}:stream:{topic}` (§6).
pub fn stream_key(product: &str, topic: &str) -> String {
    format!("{product}:stream:{topic}")
}

/// `{product}:dlq:{topic}` (§6).
pub fn dlq_key(product: &str, topic: &str) -> String {
    format!("{product}:dlq:{topic}")
}

/// `{subsystem}-{tenant_id}` (§3).
pub fn group_name(subsystem: &str, tenant_id: &str) -> String {
    format!("{subsystem}-{tenant_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_documented_format() {
        assert_eq!(stream_key("acme", "orders"), "acme:stream:orders");
        assert_eq!(dlq_key("acme", "orders"), "acme:dlq:orders");
        assert_eq!(group_name("notifications", "t1"), "notifications-t1");
    }
}
