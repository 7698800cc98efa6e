//! Global `tracing` subscriber.
//!
//! Layer stack: console output (pretty or JSON), the `EnvFilter`, and, with
//! the `otlp` feature and an endpoint configured, an OpenTelemetry layer
//! exporting spans in batches over gRPC.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::{TelemetryConfig, TelemetryError};

type ConsoleLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Flushes and shuts down the span exporter on drop.
#[derive(Default)]
pub struct TracingGuard {
    #[cfg(feature = "otlp")]
    provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl TracingGuard {
    /// Whether spans are exported beyond the local process.
    pub fn exporting(&self) -> bool {
        #[cfg(feature = "otlp")]
        {
            self.provider.is_some()
        }
        #[cfg(not(feature = "otlp"))]
        {
            false
        }
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otlp")]
        {
            if let Some(provider) = self.provider.take() {
                if let Err(e) = provider.shutdown() {
                    eprintln!("Error shutting down tracer provider: {e:?}");
                }
            }
        }
    }
}

/// Parse filter directives.
pub fn build_filter(directives: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directives).map_err(|e| TelemetryError::InvalidFilter {
        directives: directives.to_string(),
        reason: e.to_string(),
    })
}

fn console_layer(config: &TelemetryConfig) -> Option<ConsoleLayer> {
    if !config.console_output {
        return None;
    }
    let layer = if config.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true)
            .boxed()
    };
    Some(layer)
}

/// Install the global subscriber.
///
/// With the `otlp` feature and an endpoint set this must run inside a Tokio
/// runtime: the batch exporter spawns onto it.
pub fn init_tracing(config: &TelemetryConfig) -> Result<TracingGuard, TelemetryError> {
    let env_filter = build_filter(&config.log_level)?;
    let subscriber = tracing_subscriber::registry()
        .with(console_layer(config))
        .with(env_filter);

    #[cfg(feature = "otlp")]
    let guard = {
        use opentelemetry::trace::TracerProvider as _;

        let provider = config
            .otlp_endpoint
            .as_deref()
            .map(|endpoint| otlp::init_provider(config, endpoint))
            .transpose()?;
        let otel_layer = provider.as_ref().map(|provider| {
            tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
        });
        subscriber
            .with(otel_layer)
            .try_init()
            .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
        TracingGuard { provider }
    };

    #[cfg(not(feature = "otlp"))]
    let guard = {
        subscriber
            .try_init()
            .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
        if let Some(endpoint) = &config.otlp_endpoint {
            tracing::warn!(%endpoint, "OTLP endpoint set but span export is not compiled in");
        }
        TracingGuard::default()
    };

    tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        json = config.json_logs,
        exporting = guard.exporting(),
        "Tracing initialized"
    );
    Ok(guard)
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

    pub(super) fn init_provider(
        config: &TelemetryConfig,
        endpoint: &str,
    ) -> Result<TracerProvider, TelemetryError> {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint);

        opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(
                trace::Config::default()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_id_generator(RandomIdGenerator::default())
                    .with_resource(Resource::new(vec![
                        KeyValue::new("service.name", config.service_name.clone()),
                        KeyValue::new("service.version", config.service_version.clone()),
                        KeyValue::new("deployment.environment", config.environment.clone()),
                    ])),
            )
            .install_batch(runtime::Tokio)
            .map_err(|e| TelemetryError::ExporterInit(e.to_string()))
    }
}
