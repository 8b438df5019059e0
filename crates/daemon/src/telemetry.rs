//! OpenTelemetry trace export
//!
//! Endpoint comes from `logging.otlp_endpoint` or `OTEL_EXPORTER_OTLP_ENDPOINT`.
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//!     cargo run -p docflow-daemon --features telemetry
//! ```

use crate::settings::LoggingSettings;
use anyhow::Result;
use tracing_subscriber::{Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn endpoint(settings: &LoggingSettings) -> Option<String> {
    settings
        .otlp_endpoint
        .clone()
        .or_else(|| std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok())
}

/// Exporter layer, `None` when no endpoint is configured
#[cfg(feature = "telemetry")]
pub fn layer(settings: &LoggingSettings) -> Result<Option<BoxedLayer>> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::TracerProvider;
    use opentelemetry_sdk::Resource;

    let Some(endpoint) = endpoint(settings) else {
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            settings.service_name.clone(),
        )]))
        .build();
    let tracer = provider.tracer(settings.service_name.clone());
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer).boxed()))
}

#[cfg(not(feature = "telemetry"))]
pub fn layer(settings: &LoggingSettings) -> Result<Option<BoxedLayer>> {
    if endpoint(settings).is_some() {
        // The subscriber is not installed yet
        eprintln!("OTLP endpoint configured but docflow-daemon was built without the 'telemetry' feature");
    }
    Ok(None)
}

/// Flush pending spans
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
