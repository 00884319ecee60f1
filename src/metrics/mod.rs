//! Prometheus metrics for filecast
//!
//! Counters and gauges for the watch, diff and broadcast pipeline.

use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::sync::Once;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Broadcast metrics
    // ============================================================================

    /// Structural diff events broadcast
    pub static ref EVENTS_TREE_DIFF: Counter = Counter::with_opts(
        Opts::new(
            "filecast_tree_diff_events_total",
            "Structural diff events broadcast"
        )
    ).expect("Failed to create EVENTS_TREE_DIFF counter");

    /// Content diff events broadcast
    pub static ref EVENTS_CONTENT_DIFF: Counter = Counter::with_opts(
        Opts::new(
            "filecast_content_diff_events_total",
            "Content diff events broadcast"
        )
    ).expect("Failed to create EVENTS_CONTENT_DIFF counter");

    /// Initial snapshots sent to subscribers
    pub static ref EVENTS_INITIAL: Counter = Counter::with_opts(
        Opts::new(
            "filecast_initial_events_total",
            "Initial snapshot events sent"
        )
    ).expect("Failed to create EVENTS_INITIAL counter");

    /// Connections receiving each broadcast
    pub static ref BROADCAST_FANOUT: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "filecast_broadcast_fanout",
            "Connections that accepted each broadcast event"
        ).buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 50.0])
    ).expect("Failed to create BROADCAST_FANOUT histogram");

    // ============================================================================
    // Connection metrics
    // ============================================================================

    /// Currently registered connections
    pub static ref ACTIVE_CONNECTIONS: Gauge = Gauge::with_opts(
        Opts::new(
            "filecast_active_connections",
            "Currently registered subscriber connections"
        )
    ).expect("Failed to create ACTIVE_CONNECTIONS gauge");

    /// Connections dropped because their queue was full or closed
    pub static ref CONNECTIONS_DROPPED: Counter = Counter::with_opts(
        Opts::new(
            "filecast_connections_dropped_total",
            "Connections dropped on delivery failure"
        )
    ).expect("Failed to create CONNECTIONS_DROPPED counter");

    // ============================================================================
    // Watcher metrics
    // ============================================================================

    /// Running filesystem watchers
    pub static ref ACTIVE_WATCHERS: Gauge = Gauge::with_opts(
        Opts::new(
            "filecast_active_watchers",
            "Running filesystem watchers"
        )
    ).expect("Failed to create ACTIVE_WATCHERS gauge");

    /// Events suppressed by the debouncer
    pub static ref EVENTS_DEBOUNCED: Counter = Counter::with_opts(
        Opts::new(
            "filecast_debounced_events_total",
            "Filesystem events suppressed by debouncing"
        )
    ).expect("Failed to create EVENTS_DEBOUNCED counter");

    /// Events dropped because their metadata could not be read
    pub static ref PROBE_FAILURES: Counter = Counter::with_opts(
        Opts::new(
            "filecast_probe_failures_total",
            "Events dropped because the file could not be probed"
        )
    ).expect("Failed to create PROBE_FAILURES counter");
}

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once; only the first call registers.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(EVENTS_TREE_DIFF.clone()),
            Box::new(EVENTS_CONTENT_DIFF.clone()),
            Box::new(EVENTS_INITIAL.clone()),
            Box::new(BROADCAST_FANOUT.clone()),
            Box::new(ACTIVE_CONNECTIONS.clone()),
            Box::new(CONNECTIONS_DROPPED.clone()),
            Box::new(ACTIVE_WATCHERS.clone()),
            Box::new(EVENTS_DEBOUNCED.clone()),
            Box::new(PROBE_FAILURES.clone()),
        ];

        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::error!("Failed to register metric: {}", e);
            }
        }
    });
}

/// Gather all metrics in the Prometheus text exposition format
///
/// Returns an empty string if encoding fails.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Metrics contained invalid UTF-8: {}", e);
        String::new()
    })
}
