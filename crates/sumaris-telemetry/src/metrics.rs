//! Prometheus metrics for the entity-event bridge.
//!
//! All metrics follow the naming convention: `sumaris_<component>_<metric>_total`

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Messages handed to the broker
    pub static ref EVENTS_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("sumaris_events_published_total", "Messages handed to the broker"),
        &["destination"]
    ).expect("metric creation failed");

    /// Messages decoded and dispatched to listeners
    pub static ref EVENTS_CONSUMED: CounterVec = CounterVec::new(
        Opts::new("sumaris_events_consumed_total", "Messages dispatched to listeners"),
        &["destination", "operation"]
    ).expect("metric creation failed");

    /// Messages that never reached a listener or the broker
    pub static ref EVENTS_DROPPED: CounterVec = CounterVec::new(
        Opts::new("sumaris_events_dropped_total", "Messages dropped before delivery"),
        &["destination", "reason"]  // reason: malformed, lagged, broker_error, encode_error, worker_stopped, rollback
    ).expect("metric creation failed");

    /// Listener callbacks that failed or panicked
    pub static ref LISTENER_FAILURES: CounterVec = CounterVec::new(
        Opts::new("sumaris_listener_failures_total", "Listener callbacks that failed"),
        &["key"]
    ).expect("metric creation failed");
}

/// Handle for the metrics registry.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Registering twice is not an error.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(EVENTS_CONSUMED.clone()),
        Box::new(EVENTS_DROPPED.clone()),
        Box::new(LISTENER_FAILURES.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
