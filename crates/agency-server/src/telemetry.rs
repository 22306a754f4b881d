use std::time::Duration;

use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use thiserror::Error;
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::rate_limit::RateLimiters;

const SERVICE_NAME: &str = "agency-server";
const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
#[error("failed to create OTLP {signal} exporter: {reason}")]
pub struct TelemetryError {
    signal: &'static str,
    reason: String,
}

impl TelemetryError {
    fn exporter(signal: &'static str, err: impl std::fmt::Display) -> Self {
        Self {
            signal,
            reason: err.to_string(),
        }
    }
}

/// Flushes and shuts down the OTel providers on drop.
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    logger_provider: SdkLoggerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // The subscriber may already be torn down here, so report on stderr.
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("failed to shut down tracer provider: {e}");
        }
        if let Err(e) = self.meter_provider.shutdown() {
            eprintln!("failed to shut down meter provider: {e}");
        }
        if let Err(e) = self.logger_provider.shutdown() {
            eprintln!("failed to shut down logger provider: {e}");
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Console `fmt` logging filtered by `RUST_LOG` (default `info`) is always on.
/// When `OTEL_EXPORTER_OTLP_ENDPOINT` is set, traces, metrics and logs are also
/// exported over OTLP HTTP/protobuf and the returned guard must be held until
/// the end of `main` so everything is flushed.
pub fn init_telemetry() -> Result<Option<TelemetryGuard>, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(None);
    };

    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![Box::new(
        TraceContextPropagator::new(),
    )]));

    let resource = service_resource();

    // Exporters read OTEL_EXPORTER_OTLP_ENDPOINT and OTEL_EXPORTER_OTLP_HEADERS
    // themselves and append the per-signal path.
    let tracer_provider = build_tracer_provider(resource.clone())?;
    let meter_provider = build_meter_provider(resource.clone())?;
    let logger_provider = build_logger_provider(resource)?;

    global::set_meter_provider(meter_provider.clone());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(OpenTelemetryLayer::new(tracer_provider.tracer(SERVICE_NAME)))
        .with(MetricsLayer::new(meter_provider.clone()))
        .with(OpenTelemetryTracingBridge::new(&logger_provider))
        .init();

    tracing::info!(%endpoint, "OpenTelemetry export enabled");

    Ok(Some(TelemetryGuard {
        tracer_provider,
        meter_provider,
        logger_provider,
    }))
}

fn service_resource() -> Resource {
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| SERVICE_NAME.to_string());

    Resource::builder()
        .with_attributes([
            KeyValue::new(
                opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
                service_name,
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
        ])
        .build()
}

fn build_tracer_provider(resource: Resource) -> Result<SdkTracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .build()
        .map_err(|e| TelemetryError::exporter("trace", e))?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

fn build_meter_provider(resource: Resource) -> Result<SdkMeterProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .build()
        .map_err(|e| TelemetryError::exporter("metric", e))?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build())
}

fn build_logger_provider(resource: Resource) -> Result<SdkLoggerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_http()
        .build()
        .map_err(|e| TelemetryError::exporter("log", e))?;

    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

/// Register an observable gauge reporting how many client identifiers each
/// rate limiter currently holds in memory.
///
/// Safe to call without OTel: with no meter provider configured the callback
/// is never invoked.
pub fn register_rate_limit_metrics(limiters: RateLimiters) {
    let meter = global::meter(SERVICE_NAME);

    let _tracked_gauge = meter
        .u64_observable_gauge("rate_limit.tracked_identifiers")
        .with_description("Client identifiers held by each rate limiter")
        .with_callback(move |observer| {
            for limiter in limiters.iter() {
                observer.observe(
                    limiter.tracked() as u64,
                    &[KeyValue::new("policy", limiter.name().as_str())],
                );
            }
        })
        .build();
}
