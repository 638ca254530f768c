use prometheus::{IntCounter, IntGauge, Opts};

pub struct OutboxMetrics {
    pub pending: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub published: IntCounter,
    pub dead_lettered: IntCounter,
}

impl OutboxMetrics {
    pub fn new(service: &str) -> Self {
        let pending = IntGauge::with_opts(
            Opts::new("outbox_pending", "Unprocessed outbox rows").const_label("service", service),
        )
        .expect("failed to create outbox_pending");
        let oldest_pending_age_seconds = IntGauge::with_opts(
            Opts::new(
                "outbox_lag_seconds",
                "Age in seconds of the oldest unprocessed outbox row",
            )
            .const_label("service", service),
        )
        .expect("failed to create outbox_lag_seconds");
        let published = IntCounter::with_opts(
            Opts::new("events_produced_total", "Events published to the stream bus")
                .const_label("service", service),
        )
        .expect("failed to create events_produced_total");
        let dead_lettered = IntCounter::with_opts(
            Opts::new("dlq_depth", "Events moved to the dead-letter stream")
                .const_label("service", service),
        )
        .expect("failed to create dlq_depth");

        let registry = prometheus::default_registry();
        registry
            .register(Box::new(pending.clone()))
            .expect("failed to register outbox_pending");
        registry
            .register(Box::new(oldest_pending_age_seconds.clone()))
            .expect("failed to register outbox_lag_seconds");
        registry
            .register(Box::new(published.clone()))
            .expect("failed to register events_produced_total");
        registry
            .register(Box::new(dead_lettered.clone()))
            .expect("failed to register dlq_depth");

        Self {
            pending,
            oldest_pending_age_seconds,
            published,
            dead_lettered,
        }
    }
}
