//! Prometheus metrics for the fleet manager.
//!
//! All metrics follow the naming convention: `fleet_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., node_transitions_total)
//! - **Gauge**: Value that can go up or down (e.g., hosts_unreachable)
//! - **Histogram**: Distribution of values (e.g., poll_cycle_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{Arc, Once};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // NODE LIFECYCLE
    // =========================================================================

    /// Node status transitions, labelled by old and new status
    pub static ref NODE_TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new("fleet_node_transitions_total", "Node status transitions"),
        &["from", "to"]
    ).expect("metric creation failed");

    /// Background provisioning and reconfiguration outcomes
    pub static ref PROVISIONING_OUTCOMES: CounterVec = CounterVec::new(
        Opts::new("fleet_provisioning_total", "Completed provisioning and reconfiguration tasks"),
        &["kind", "outcome"]  // kind: provision/reconfigure, outcome: running/failed/timeout
    ).expect("metric creation failed");

    /// Background tasks currently holding a permit
    pub static ref BACKGROUND_TASKS_INFLIGHT: Gauge = Gauge::new(
        "fleet_background_tasks_inflight",
        "Provisioning and reconfiguration tasks currently running"
    ).expect("metric creation failed");

    // =========================================================================
    // POLLERS
    // =========================================================================

    /// Node health probe results
    pub static ref HEALTH_CHECKS: CounterVec = CounterVec::new(
        Opts::new("fleet_health_checks_total", "Node health probe results"),
        &["result"]
    ).expect("metric creation failed");

    /// Remote host reachability probes
    pub static ref HOST_PROBES: CounterVec = CounterVec::new(
        Opts::new("fleet_host_probes_total", "Remote host reachability probes"),
        &["outcome"]  // reachable/unreachable/reconnected
    ).expect("metric creation failed");

    /// Remote hosts currently marked unreachable
    pub static ref HOSTS_UNREACHABLE: Gauge = Gauge::new(
        "fleet_hosts_unreachable",
        "Remote hosts currently marked unreachable"
    ).expect("metric creation failed");

    /// Poll cycle duration
    pub static ref POLL_CYCLE_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "fleet_poll_cycle_duration_seconds",
            "Time spent in one poller cycle"
        ).buckets(exponential_buckets(0.005, 2.0, 14).expect("valid buckets")),
        &["poller"]
    ).expect("metric creation failed");

    // =========================================================================
    // EVENT LOG
    // =========================================================================

    /// Events appended to the audit log
    pub static ref EVENTS_RECORDED: CounterVec = CounterVec::new(
        Opts::new("fleet_events_recorded_total", "Events appended to the audit log"),
        &["kind"]
    ).expect("metric creation failed");
}

static REGISTER: Once = Once::new();

/// Handle to the registry the metrics live in.
pub struct MetricsHandle {
    registry: Arc<Registry>,
}

impl MetricsHandle {
    /// The underlying registry, for exposition endpoints.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; only the first call registers.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let mut result = Ok(());
    REGISTER.call_once(|| {
        let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(NODE_TRANSITIONS.clone()),
            Box::new(PROVISIONING_OUTCOMES.clone()),
            Box::new(BACKGROUND_TASKS_INFLIGHT.clone()),
            Box::new(HEALTH_CHECKS.clone()),
            Box::new(HOST_PROBES.clone()),
            Box::new(HOSTS_UNREACHABLE.clone()),
            Box::new(POLL_CYCLE_DURATION.clone()),
            Box::new(EVENTS_RECORDED.clone()),
        ];

        for metric in metrics {
            if let Err(e) = REGISTRY.register(metric) {
                result = Err(TelemetryError::MetricsInit(e.to_string()));
                return;
            }
        }
    });
    result?;

    Ok(MetricsHandle {
        registry: Arc::new(REGISTRY.clone()),
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

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: prometheus::Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start timing one labelled series of a histogram vector.
    pub fn new(histogram: &HistogramVec, label: &str) -> Self {
        Self {
            histogram: histogram.with_label_values(&[label]),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
