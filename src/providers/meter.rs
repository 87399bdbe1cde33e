use anyhow::Context;
#[cfg(feature = "http")]
use opentelemetry_otlp::WithHttpConfig;
#[cfg(any(feature = "grpc", feature = "http"))]
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::Resource;

use crate::config::{Protocol, TelemetryConfig};
use crate::lifecycle::{ManagedResource, ResourceKind};

/// Build and globally register a [`SdkMeterProvider`].
///
/// When `endpoint` is given, a periodic reader pushes to it every
/// `metrics_export_interval`.
///
/// # Errors
///
/// Returns an error if the OTLP exporter fails to initialize.
pub(crate) fn build_meter_provider(
    resource: Resource,
    config: &TelemetryConfig,
    endpoint: Option<&str>,
) -> anyhow::Result<SdkMeterProvider> {
    let mut builder = SdkMeterProvider::builder().with_resource(resource);

    if let Some(endpoint) = endpoint {
        let exporter = build_metric_exporter(endpoint, config)
            .with_context(|| format!("Failed to build OTLP metric exporter for {endpoint}"))?;
        let reader = PeriodicReader::builder(exporter)
            .with_interval(config.metrics_export_interval)
            .build();
        builder = builder.with_reader(reader);
    }

    let provider = builder.build();

    // Instrument factories are resolved through the global provider
    opentelemetry::global::set_meter_provider(provider.clone());

    Ok(provider)
}

#[cfg_attr(not(any(feature = "grpc", feature = "http")), allow(unused_variables))]
fn build_metric_exporter(
    endpoint: &str,
    config: &TelemetryConfig,
) -> anyhow::Result<opentelemetry_otlp::MetricExporter> {
    match config.protocol {
        Protocol::Grpc => {
            #[cfg(feature = "grpc")]
            {
                let exporter = opentelemetry_otlp::MetricExporter::builder()
                    .with_tonic()
                    .with_endpoint(endpoint)
                    .with_timeout(config.export_timeout)
                    .build()
                    .context("Failed to build gRPC metric exporter")?;
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
                let exporter = opentelemetry_otlp::MetricExporter::builder()
                    .with_http()
                    .with_protocol(crate::providers::http_protocol(config.protocol))
                    .with_endpoint(crate::providers::signal_endpoint(
                        endpoint,
                        config.protocol,
                        "/v1/metrics",
                    ))
                    .with_headers(crate::providers::export_headers(config))
                    .with_timeout(config.export_timeout)
                    .build()
                    .context("Failed to build HTTP metric exporter")?;
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

impl ManagedResource for SdkMeterProvider {
    fn kind(&self) -> ResourceKind {
        ResourceKind::MeterProvider
    }

    fn dispose(&self) -> anyhow::Result<()> {
        let flushed = self.force_flush().context("Failed to flush meter provider");
        self.shutdown().context("Failed to shut down meter provider")?;
        flushed
    }
}
