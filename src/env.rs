use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{Protocol, TelemetryConfig};

const SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
const ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
const TIMEOUT_MS: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
const HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const LOG_LEVEL: &str = "OTEL_LOG_LEVEL";
const RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";

impl TelemetryConfig {
    /// Fill unset fields from the standard `OTEL_*` environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Programmatic: values already present on the config
    /// 2. Environment variables: `OTEL_SERVICE_NAME`, `OTEL_EXPORTER_OTLP_*`,
    ///    `OTEL_LOG_LEVEL`, `OTEL_RESOURCE_ATTRIBUTES`
    /// 3. Defaults
    ///
    /// Protocol and timeout have non-empty defaults, so the environment only overrides
    /// them while they still hold their default values.
    pub fn with_env_overrides(mut self) -> Self {
        let defaults = TelemetryConfig::default();

        fill_blank(&mut self.service_name, SERVICE_NAME);
        fill_blank(&mut self.collector_endpoint, ENDPOINT);

        if self.protocol == defaults.protocol {
            let protocol = lookup(PROTOCOL).and_then(|raw| Protocol::from_otel_value(&raw));
            if let Some(protocol) = protocol {
                self.protocol = protocol;
            }
        }
        if self.export_timeout == defaults.export_timeout {
            if let Some(timeout) = lookup(TIMEOUT_MS).and_then(|raw| millis(&raw)) {
                self.export_timeout = timeout;
            }
        }
        if self.minimum_log_level.is_none() {
            self.minimum_log_level = lookup(LOG_LEVEL);
        }

        merge_pairs(&mut self.headers, HEADERS);
        merge_pairs(&mut self.labels, RESOURCE_ATTRIBUTES);

        self
    }
}

impl Protocol {
    /// Parse the protocol names used by `OTEL_EXPORTER_OTLP_PROTOCOL`.
    fn from_otel_value(raw: &str) -> Option<Self> {
        [
            ("grpc", Protocol::Grpc),
            ("http/protobuf", Protocol::HttpProtobuf),
            ("http/json", Protocol::HttpJson),
        ]
        .into_iter()
        .find_map(|(name, protocol)| raw.eq_ignore_ascii_case(name).then_some(protocol))
    }
}

/// Trimmed value of `var`; unset and blank are the same thing.
fn lookup(var: &str) -> Option<String> {
    let value = std::env::var(var).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn fill_blank(slot: &mut String, var: &str) {
    if slot.trim().is_empty() {
        if let Some(value) = lookup(var) {
            *slot = value;
        }
    }
}

fn millis(raw: &str) -> Option<Duration> {
    raw.parse().ok().map(Duration::from_millis)
}

/// Add the pairs listed in `var` without replacing keys already on `target`.
fn merge_pairs(target: &mut BTreeMap<String, String>, var: &str) {
    let Some(raw) = lookup(var) else {
        return;
    };
    for (key, value) in key_value_pairs(&raw) {
        target.entry(key).or_insert(value);
    }
}

/// `k1=v1,k2=v2` as used by the OTLP header and resource attribute variables.
/// Entries without `=` or with a blank key are dropped.
fn key_value_pairs(raw: &str) -> impl Iterator<Item = (String, String)> + '_ {
    raw.split(',')
        .filter_map(|entry| entry.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
}
