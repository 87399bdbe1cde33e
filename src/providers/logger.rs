use anyhow::Context;
#[cfg(feature = "http")]
use opentelemetry_otlp::WithHttpConfig;
#[cfg(any(feature = "grpc", feature = "http"))]
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::Resource;

use crate::config::{Protocol, TelemetryConfig};
use crate::lifecycle::{ManagedResource, ResourceKind};

/// Build a [`SdkLoggerProvider`] with one batched OTLP exporter per endpoint.
///
/// # Errors
///
/// Returns an error if any OTLP exporter fails to initialize.
pub(crate) fn build_logger_provider(
    resource: Resource,
    config: &TelemetryConfig,
    endpoints: &[&str],
) -> anyhow::Result<SdkLoggerProvider> {
    let mut builder = SdkLoggerProvider::builder().with_resource(resource);

    for endpoint in endpoints {
        let exporter = build_log_exporter(endpoint, config)
            .with_context(|| format!("Failed to build OTLP log exporter for {endpoint}"))?;
        builder = builder.with_batch_exporter(exporter);
    }

    Ok(builder.build())
}

#[cfg_attr(not(any(feature = "grpc", feature = "http")), allow(unused_variables))]
fn build_log_exporter(
    endpoint: &str,
    config: &TelemetryConfig,
) -> anyhow::Result<opentelemetry_otlp::LogExporter> {
    match config.protocol {
        Protocol::Grpc => {
            #[cfg(feature = "grpc")]
            {
                let exporter = opentelemetry_otlp::LogExporter::builder()
                    .with_tonic()
                    .with_endpoint(endpoint)
                    .with_timeout(config.export_timeout)
                    .build()
                    .context("Failed to build gRPC log exporter")?;
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
                let exporter = opentelemetry_otlp::LogExporter::builder()
                    .with_http()
                    .with_protocol(crate::providers::http_protocol(config.protocol))
                    .with_endpoint(crate::providers::signal_endpoint(
                        endpoint,
                        config.protocol,
                        "/v1/logs",
                    ))
                    .with_headers(crate::providers::export_headers(config))
                    .with_timeout(config.export_timeout)
                    .build()
                    .context("Failed to build HTTP log exporter")?;
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

impl ManagedResource for SdkLoggerProvider {
    fn kind(&self) -> ResourceKind {
        ResourceKind::LoggerProvider
    }

    fn dispose(&self) -> anyhow::Result<()> {
        let flushed = self.force_flush().context("Failed to flush logger provider");
        self.shutdown().context("Failed to shut down logger provider")?;
        flushed
    }
}
