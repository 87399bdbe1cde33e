use anyhow::Context;
#[cfg(feature = "http")]
use opentelemetry_otlp::WithHttpConfig;
#[cfg(any(feature = "grpc", feature = "http"))]
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;

use crate::config::{Protocol, TelemetryConfig};
use crate::lifecycle::{ManagedResource, ResourceKind};

/// Build and globally register a [`SdkTracerProvider`].
///
/// An OTLP exporter is attached only when `endpoint` is given; without one the provider
/// still hands out tracers, spans just go nowhere.
///
/// # Errors
///
/// Returns an error if the OTLP exporter fails to initialize.
pub(crate) fn build_tracer_provider(
    resource: Resource,
    config: &TelemetryConfig,
    endpoint: Option<&str>,
) -> anyhow::Result<SdkTracerProvider> {
    let mut builder = SdkTracerProvider::builder().with_resource(resource);

    if let Some(endpoint) = endpoint {
        let exporter = build_span_exporter(endpoint, config)
            .with_context(|| format!("Failed to build OTLP span exporter for {endpoint}"))?;
        builder = builder.with_batch_exporter(exporter);
    }

    let provider = builder.build();

    // Register globally so auto-instrumentation and context propagation work
    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(provider)
}

#[cfg_attr(not(any(feature = "grpc", feature = "http")), allow(unused_variables))]
fn build_span_exporter(
    endpoint: &str,
    config: &TelemetryConfig,
) -> anyhow::Result<opentelemetry_otlp::SpanExporter> {
    match config.protocol {
        Protocol::Grpc => {
            #[cfg(feature = "grpc")]
            {
                // TODO: forward `config.headers` as tonic metadata once tonic is a direct
                // dependency.
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_tonic()
                    .with_endpoint(endpoint)
                    .with_timeout(config.export_timeout)
                    .build()
                    .context("Failed to build gRPC span exporter")?;
                Ok(exporter)
            }
            #[cfg(not(feature = "grpc"))]
            {
                anyhow::bail!(
                    "gRPC transport requested but the `grpc` feature is not enabled. \
                     Enable it in Cargo.toml: raccoon-telemetry = {{ features = [\"grpc\"] }}"
                );
            }
        }
        Protocol::HttpProtobuf | Protocol::HttpJson => {
            #[cfg(feature = "http")]
            {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .with_protocol(crate::providers::http_protocol(config.protocol))
                    .with_endpoint(crate::providers::signal_endpoint(
                        endpoint,
                        config.protocol,
                        "/v1/traces",
                    ))
                    .with_headers(crate::providers::export_headers(config))
                    .with_timeout(config.export_timeout)
                    .build()
                    .context("Failed to build HTTP span exporter")?;
                Ok(exporter)
            }
            #[cfg(not(feature = "http"))]
            {
                anyhow::bail!(
                    "HTTP transport requested but the `http` feature is not enabled. \
                     Enable it in Cargo.toml: raccoon-telemetry = {{ features = [\"http\"] }}"
                );
            }
        }
    }
}

impl ManagedResource for SdkTracerProvider {
    fn kind(&self) -> ResourceKind {
        ResourceKind::TracerProvider
    }

    fn dispose(&self) -> anyhow::Result<()> {
        let flushed = self.force_flush().context("Failed to flush tracer provider");
        self.shutdown().context("Failed to shut down tracer provider")?;
        flushed
    }
}
