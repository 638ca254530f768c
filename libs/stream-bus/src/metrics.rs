//! Prometheus metrics for stream bus writes, registered into the process's
//! default registry so the gateway's `/metrics` scrape picks them up
//! alongside its own, the way `db-pool`'s own metrics module does for pool
//! acquisition.

use once_cell::sync::Lazy;
use prometheus::HistogramVec;

pub static BUS_APPEND_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        prometheus::HistogramOpts::new("bus_append_duration_seconds", "Stream bus append latency")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["topic"],
    )
    .expect("failed to create bus_append_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(h.clone()))
        .expect("failed to register bus_append_duration_seconds");
    h
});
