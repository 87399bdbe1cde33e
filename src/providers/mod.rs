pub(crate) mod logger;
pub(crate) mod meter;
pub(crate) mod tracer;

use std::collections::HashMap;

use crate::config::{Protocol, TelemetryConfig};

/// Endpoint a single signal is exported to. OTLP over HTTP expects a per-signal path
/// (`/v1/traces`, `/v1/metrics`, `/v1/logs`); gRPC takes the base endpoint as-is.
#[cfg_attr(not(feature = "http"), allow(dead_code))]
pub(crate) fn signal_endpoint(endpoint: &str, protocol: Protocol, signal_path: &str) -> String {
    match protocol {
        Protocol::Grpc => endpoint.to_owned(),
        Protocol::HttpProtobuf | Protocol::HttpJson => {
            let base = endpoint.trim_end_matches('/');
            if base.ends_with(signal_path) {
                base.to_owned()
            } else {
                format!("{base}{signal_path}")
            }
        }
    }
}

/// Wire encoding for the HTTP exporters. `Grpc` never reaches an HTTP builder.
#[cfg(feature = "http")]
pub(crate) fn http_protocol(protocol: Protocol) -> opentelemetry_otlp::Protocol {
    match protocol {
        Protocol::HttpJson => opentelemetry_otlp::Protocol::HttpJson,
        Protocol::HttpProtobuf | Protocol::Grpc => opentelemetry_otlp::Protocol::HttpBinary,
    }
}

#[cfg_attr(not(feature = "http"), allow(dead_code))]
pub(crate) fn export_headers(config: &TelemetryConfig) -> HashMap<String, String> {
    config
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
