//! # Fleet Telemetry
//!
//! Logging and metrics bootstrap for the validator fleet manager.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` registry with an env filter and either a
//!   pretty or a JSON formatter
//! - **Traces**: optional OTLP export (`otlp` feature)
//! - **Metrics**: Prometheus counters, gauges and histograms
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleet_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env())
//!         .await
//!         .expect("telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FLEET_LOG_LEVEL` | `info` | Log level filter (`RUST_LOG` also honoured) |
//! | `FLEET_JSON_LOGS` | `false` | Emit JSON lines instead of pretty output |
//! | `FLEET_CONSOLE_OUTPUT` | `true` | Write logs to stdout at all |
//! | `OTEL_SERVICE_NAME` | `fleet-manager` | Service name in traces |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | unset | OTLP collector, `otlp` feature only |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, LoggingGuard};
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, MetricsHandle, BACKGROUND_TASKS_INFLIGHT,
    EVENTS_RECORDED, HEALTH_CHECKS, HOSTS_UNREACHABLE, HOST_PROBES, NODE_TRANSITIONS,
    POLL_CYCLE_DURATION, PROVISIONING_OUTCOMES,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// OTLP pipeline could not be built.
    #[error("Failed to initialize trace export: {0}")]
    TracerInit(String),

    /// Prometheus registration or encoding failed.
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging, optional trace export, and metrics.
///
/// Hold the returned guard for the lifetime of the process. Dropping it
/// flushes pending spans when the `otlp` feature is enabled.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    let logging = init_logging(&config)?;

    Ok(TelemetryGuard {
        _logging: logging,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logging: LoggingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "fleet-manager");
    }

    #[test]
    fn test_metric_inc_macro() {
        metric_inc!(HEALTH_CHECKS, &["healthy"]);
        assert!(HEALTH_CHECKS.with_label_values(&["healthy"]).get() >= 1.0);
    }
}
