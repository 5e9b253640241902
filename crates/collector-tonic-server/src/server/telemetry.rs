//! Logging and OpenTelemetry export for a collector node.
//!
//! Console logs are always installed: a pretty `fmt` layer filtered by
//! `RUST_LOG` (default `info`). On top of it, features add exporters:
//!
//! - `tracing`: spans (RPC handlers, remote dispatch) through
//!   `tracing-opentelemetry`.
//! - `metrics`: register and remote-dispatch instruments, see the
//!   `increment_*` and `record_*` functions below. Without the feature they
//!   compile to no-ops.
//! - `stdout`: prints spans and metrics every 5 seconds.
//! - `otlp`: ships spans and metrics over OTLP/gRPC. The endpoint, headers
//!   and timeout come from the standard `OTEL_EXPORTER_OTLP_*` variables.
//!
//! Only events inside a span reach the span exporters; everything else stays
//! in the console output.
//!
//! ```bash
//! RUST_LOG=collector_register=debug cargo run --features tracing,metrics,stdout
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://otel:4317 cargo run --features tracing,metrics,otlp
//! ```

#[cfg(all(
    any(feature = "stdout", feature = "otlp"),
    not(any(feature = "tracing", feature = "metrics"))
))]
compile_error!("the `stdout` and `otlp` exporters need `tracing` or `metrics` enabled");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(any(feature = "stdout", feature = "otlp"))]
const EXPORT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Providers flushed by the shutdown path.
pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder("collector")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    #[cfg(feature = "tracing")]
    let tracer_provider = tracer_provider()?;
    #[cfg(feature = "tracing")]
    let registry = {
        use opentelemetry_sdk::propagation::TraceContextPropagator;

        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let meter_provider = meter_provider()?;
    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("collector")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "tracing")]
fn tracer_provider() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batch(opentelemetry_stdout::SpanExporter::default()));

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        use opentelemetry_otlp::WithExportConfig;

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_protocol(opentelemetry_otlp::Protocol::Grpc)
            .build()
            .context("failed to build OTLP span exporter")?;
        builder.with_span_processor(batch(exporter))
    };

    Ok(builder.build())
}

#[cfg(all(feature = "tracing", any(feature = "stdout", feature = "otlp")))]
fn batch<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(EXPORT_INTERVAL)
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "metrics")]
fn meter_provider() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_reader(
        sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(EXPORT_INTERVAL)
            .build(),
    );

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;
        use opentelemetry_otlp::WithExportConfig;

        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_protocol(opentelemetry_otlp::Protocol::Grpc)
            .build()
            .context("failed to build OTLP metric exporter")?;
        builder.with_reader(
            sdkmetrics::PeriodicReader::builder(exporter)
                .with_interval(EXPORT_INTERVAL)
                .build(),
        )
    };

    Ok(builder.build())
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static REGISTER_REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REGISTER_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REGISTER_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REMOTE_DISPATCHES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static REMOTE_DISPATCH_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = REGISTER_REQUESTS.set(
        meter
            .u64_counter("register_requests")
            .with_description("Register RPCs received, by operation")
            .build(),
    );

    let _ = REGISTER_ERRORS.set(
        meter
            .u64_counter("register_errors")
            .with_description("Register RPCs answered with an error, by operation")
            .build(),
    );

    let _ = REGISTER_DURATION_MS.set(
        meter
            .f64_histogram("register_duration")
            .with_unit("ms")
            .with_description("End-to-end register RPC duration")
            .build(),
    );

    let _ = REMOTE_DISPATCHES.set(
        meter
            .u64_counter("remote_dispatches")
            .with_description("Worker messages received from peer nodes")
            .build(),
    );

    let _ = REMOTE_DISPATCH_ERRORS.set(
        meter
            .u64_counter("remote_dispatch_errors")
            .with_description("Worker messages from peer nodes that failed")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_register_requests(operation: &'static str) {
    if let Some(counter) = REGISTER_REQUESTS.get() {
        counter.add(1, &[KeyValue::new("operation", operation)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_register_requests(_operation: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_register_errors(operation: &'static str) {
    if let Some(counter) = REGISTER_ERRORS.get() {
        counter.add(1, &[KeyValue::new("operation", operation)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_register_errors(_operation: &'static str) {}

#[cfg(feature = "metrics")]
pub fn record_register_duration(operation: &'static str, duration_ms: f64) {
    if let Some(histogram) = REGISTER_DURATION_MS.get() {
        histogram.record(duration_ms, &[KeyValue::new("operation", operation)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_register_duration(_operation: &'static str, _duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_remote_dispatches(role: &str) {
    if let Some(counter) = REMOTE_DISPATCHES.get() {
        counter.add(1, &[KeyValue::new("role", role.to_string())]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_remote_dispatches(_role: &str) {}

#[cfg(feature = "metrics")]
pub fn increment_remote_dispatch_errors(role: &str) {
    if let Some(counter) = REMOTE_DISPATCH_ERRORS.get() {
        counter.add(1, &[KeyValue::new("role", role.to_string())]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_remote_dispatch_errors(_role: &str) {}
