//! Logging setup
//!
//! One global subscriber: env filter, stdout (pretty or JSON), an optional
//! daily-rotated file and, with the `telemetry` feature, an OTLP exporter.

use crate::settings::{LogFormat, LoggingSettings};
use crate::telemetry;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keep the returned guard alive for the lifetime of the process; dropping it
/// flushes the file writer
pub fn init(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(settings)?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(match settings.format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    });

    let guard = match &settings.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "docflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    let otel = telemetry::layer(settings)?;
    let otel_enabled = otel.is_some();
    layers.extend(otel);

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install the global tracing subscriber")?;

    if otel_enabled {
        tracing::info!(service_name = %settings.service_name, "OpenTelemetry export enabled");
    }
    Ok(guard)
}

/// `RUST_LOG` first, then the configured directives
fn env_filter(settings: &LoggingSettings) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.level)
            .with_context(|| format!("Invalid log filter '{}'", settings.level)),
    }
}
