//! Logging for the pgdeck binary
//!
//! Console output always goes through one `fmt` layer. With `--otel` and the
//! `telemetry` feature, spans are also exported over OTLP.
//!
//! The default filter covers pgdeck's own crates and `tower_http` request
//! spans; `RUST_LOG` replaces it entirely, e.g.
//! `RUST_LOG=pgdeck_core=trace,sqlx=debug pgdeck serve`.
//!
//! OTLP export honours `OTEL_EXPORTER_OTLP_ENDPOINT` (default
//! `http://localhost:4317`) and `OTEL_SERVICE_NAME` (default: this crate's
//! package name).

use anyhow::{anyhow, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Crates whose events are shown when `RUST_LOG` is unset
const LOG_TARGETS: &[&str] = &["pgdeck", "pgdeck_core", "pgdeck_server", "tower_http"];

#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Raise pgdeck's targets to debug (ignored when RUST_LOG is set)
    pub debug: bool,
    /// Export spans over OTLP
    pub otel: bool,
}

/// Filter directives used when `RUST_LOG` is unset.
fn default_directives(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn env_filter(config: &TracingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config.debug)))
}

#[cfg(feature = "telemetry")]
type OtelLayer = tracing_opentelemetry::OpenTelemetryLayer<
    tracing_subscriber::Registry,
    opentelemetry_sdk::trace::Tracer,
>;

#[cfg(not(feature = "telemetry"))]
type OtelLayer = tracing_subscriber::layer::Identity;

/// Install the global subscriber.
pub fn init(config: &TracingConfig) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(config.debug)
        .compact();

    let otel = otel_layer(config)?;
    let exporting = otel.is_some();

    tracing_subscriber::registry()
        .with(otel)
        .with(env_filter(config))
        .with(fmt_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    if exporting {
        tracing::info!("OpenTelemetry export enabled");
    }
    Ok(())
}

#[cfg(feature = "telemetry")]
fn otel_layer(config: &TracingConfig) -> Result<Option<OtelLayer>> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::TracerProvider;

    if !config.otel {
        return Ok(None);
    }

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()
        .map_err(|e| anyhow!("Failed to create OTLP exporter for {endpoint}: {e}"))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(opentelemetry_sdk::Resource::new(vec![
            KeyValue::new("service.name", service_name),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]))
        .build();
    let tracer = provider.tracer(env!("CARGO_PKG_NAME"));

    // Export stops if the provider is dropped
    let _ = opentelemetry::global::set_tracer_provider(provider);

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}

#[cfg(not(feature = "telemetry"))]
fn otel_layer(config: &TracingConfig) -> Result<Option<OtelLayer>> {
    if config.otel {
        eprintln!("--otel ignored: pgdeck was built without the telemetry feature");
    }
    Ok(None)
}

/// Flush pending spans before exit.
pub fn shutdown_otel() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
