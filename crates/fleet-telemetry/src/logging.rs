//! Subscriber setup.
//!
//! One registry carries every layer:
//! - `EnvFilter` built from `RUST_LOG`, falling back to the configured level
//! - a JSON formatter (containers) or a pretty formatter (development)
//! - an OpenTelemetry layer exporting spans over OTLP (`otlp` feature)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Keeps the subscriber's exporters alive.
pub struct LoggingGuard {
    #[cfg(feature = "otlp")]
    provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otlp")]
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {:?}", e);
            }
        }
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &TelemetryConfig) -> Result<LoggingGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Config(e.to_string()))?;

    let json_layer = (config.console_output && config.json_logs).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    let pretty_layer = (config.console_output && !config.json_logs).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer);

    #[cfg(feature = "otlp")]
    {
        let provider = otlp::build_provider(config)?;
        let otel_layer = provider.as_ref().map(|p| {
            use opentelemetry::trace::TracerProvider as _;
            tracing_opentelemetry::layer().with_tracer(p.tracer(config.service_name.clone()))
        });
        registry
            .with(otel_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

        tracing::info!(
            service = %config.service_name,
            json_logs = config.json_logs,
            otlp = provider.is_some(),
            "Logging initialized"
        );
        return Ok(LoggingGuard { provider });
    }

    #[cfg(not(feature = "otlp"))]
    {
        registry
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

        tracing::info!(
            service = %config.service_name,
            json_logs = config.json_logs,
            "Logging initialized"
        );
        Ok(LoggingGuard {})
    }
}

#[cfg(feature = "otlp")]
mod otlp {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{
        runtime,
        trace::{self, RandomIdGenerator, Sampler, TracerProvider},
        Resource,
    };

    use crate::{TelemetryConfig, TelemetryError};

    /// Build a batch OTLP pipeline when an endpoint is configured.
    pub(super) fn build_provider(
        config: &TelemetryConfig,
    ) -> Result<Option<TracerProvider>, TelemetryError> {
        let Some(endpoint) = config.otlp_endpoint.as_deref() else {
            return Ok(None);
        };

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint);

        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(
                trace::Config::default()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_id_generator(RandomIdGenerator::default())
                    .with_resource(Resource::new(vec![
                        KeyValue::new("service.name", config.service_name.clone()),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                        KeyValue::new("deployment.environment", config.network.clone()),
                    ])),
            )
            .install_batch(runtime::Tokio)
            .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

        Ok(Some(provider))
    }
}
