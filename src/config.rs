use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_SERVICE_VERSION: &str = "1.0.0";
const DEFAULT_SCRAPE_PORT: u32 = 9090;
const DEFAULT_SCRAPE_PATH: &str = "/metrics";
const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_SLOW_REQUEST_THRESHOLD_MS: u64 = 1000;

/// Request-duration boundaries (seconds) recommended by the OpenTelemetry HTTP conventions.
const DEFAULT_HISTOGRAM_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// OTLP transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// gRPC transport (port 4317).
    Grpc,
    /// HTTP with Protobuf encoding (default, port 4318).
    #[default]
    HttpProtobuf,
    /// HTTP with JSON encoding (port 4318).
    HttpJson,
}

/// Minimum log severity, using the seven-level vocabulary operators configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Information,
    Warning,
    Error,
    Critical,
    Fatal,
}

impl Severity {
    pub const ALL: [Severity; 7] = [
        Severity::Trace,
        Severity::Debug,
        Severity::Information,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
        Severity::Fatal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "Trace",
            Severity::Debug => "Debug",
            Severity::Information => "Information",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Critical => "Critical",
            Severity::Fatal => "Fatal",
        }
    }

    /// The `tracing` level this severity filters at. `tracing` has no level above
    /// `ERROR`, so Critical and Fatal collapse onto it.
    pub fn level_filter(self) -> tracing::level_filters::LevelFilter {
        use tracing::level_filters::LevelFilter;
        match self {
            Severity::Trace => LevelFilter::TRACE,
            Severity::Debug => LevelFilter::DEBUG,
            Severity::Information => LevelFilter::INFO,
            Severity::Warning => LevelFilter::WARN,
            Severity::Error | Severity::Critical | Severity::Fatal => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the seven severity names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSeverity(pub String);

impl fmt::Display for UnknownSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown severity `{}`", self.0)
    }
}

impl std::error::Error for UnknownSeverity {}

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Severity::ALL
            .into_iter()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownSeverity(s.to_owned()))
    }
}

/// A secondary network log destination, exported over OTLP.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSinkConfig {
    pub name: String,
    pub endpoint: String,
    pub enabled: bool,
}

impl LogSinkConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            enabled: true,
        }
    }
}

/// Overrides for the names of the instruments this crate creates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricNaming {
    /// Prepended to every instrument name, joined with `.`.
    pub prefix: Option<String>,
    pub http_server_duration: Option<String>,
    pub http_client_duration: Option<String>,
}

impl MetricNaming {
    pub(crate) fn resolve(&self, default_name: &str, override_name: Option<&String>) -> String {
        let name = override_name.map(String::as_str).unwrap_or(default_name);
        match self.prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}.{name}"),
            _ => name.to_owned(),
        }
    }
}

/// Declarative configuration for the whole telemetry stack.
///
/// Build one with [`TelemetryConfig::builder()`], deserialize it with serde (every field
/// has a default), or layer `OTEL_*` environment variables on top with
/// [`TelemetryConfig::with_env_overrides()`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: Option<String>,
    pub environment: String,

    pub enable_metrics: bool,
    pub enable_tracing: bool,
    pub enable_logging: bool,

    /// Primary OTLP collector endpoint.
    pub collector_endpoint: String,
    /// Used when `collector_endpoint` is empty.
    pub legacy_endpoint: String,
    pub protocol: Protocol,
    pub headers: BTreeMap<String, String>,
    #[serde(with = "duration_millis")]
    pub export_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub metrics_export_interval: Duration,

    pub log_aggregation_url: String,
    pub enable_console_logging: bool,
    pub enable_file_logging: bool,
    /// Path template for the rolling file sink; defaults to `logs/{service_name}.log`.
    pub file_log_path: Option<String>,
    pub additional_log_sinks: Vec<LogSinkConfig>,

    pub enable_scrape_endpoint: bool,
    pub scrape_port: u32,
    pub scrape_path: String,

    pub slow_request_threshold_ms: u64,
    pub minimum_log_level: Option<String>,

    pub labels: BTreeMap<String, String>,
    pub log_labels: BTreeMap<String, String>,
    pub histogram_buckets: Vec<f64>,
    pub metric_naming: MetricNaming,

    pub enable_runtime_instrumentation: bool,
    pub enable_http_client_instrumentation: bool,
    pub enable_request_instrumentation: bool,
    pub enable_correlation_id: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            service_version: None,
            environment: "production".to_owned(),
            enable_metrics: true,
            enable_tracing: true,
            enable_logging: true,
            collector_endpoint: String::new(),
            legacy_endpoint: String::new(),
            protocol: Protocol::default(),
            headers: BTreeMap::new(),
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            metrics_export_interval: DEFAULT_METRICS_EXPORT_INTERVAL,
            log_aggregation_url: String::new(),
            enable_console_logging: true,
            enable_file_logging: false,
            file_log_path: None,
            additional_log_sinks: Vec::new(),
            enable_scrape_endpoint: true,
            scrape_port: DEFAULT_SCRAPE_PORT,
            scrape_path: DEFAULT_SCRAPE_PATH.to_owned(),
            slow_request_threshold_ms: DEFAULT_SLOW_REQUEST_THRESHOLD_MS,
            minimum_log_level: None,
            labels: BTreeMap::new(),
            log_labels: BTreeMap::new(),
            histogram_buckets: DEFAULT_HISTOGRAM_BUCKETS.to_vec(),
            metric_naming: MetricNaming::default(),
            enable_runtime_instrumentation: true,
            enable_http_client_instrumentation: true,
            enable_request_instrumentation: true,
            enable_correlation_id: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new builder for `TelemetryConfig`.
    pub fn builder(service_name: impl Into<String>) -> TelemetryConfigBuilder {
        TelemetryConfigBuilder {
            config: TelemetryConfig {
                service_name: service_name.into(),
                ..TelemetryConfig::default()
            },
        }
    }

    pub fn service_version(&self) -> &str {
        self.service_version
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(DEFAULT_SERVICE_VERSION)
    }

    pub fn is_metrics_enabled(&self) -> bool {
        self.enable_metrics
    }

    pub fn is_tracing_enabled(&self) -> bool {
        self.enable_tracing
    }

    pub fn is_logging_enabled(&self) -> bool {
        self.enable_logging
    }

    /// The endpoint exporters are pointed at: the collector endpoint when set, else the
    /// legacy endpoint. `None` when both are empty.
    pub fn effective_endpoint(&self) -> Option<&str> {
        [&self.collector_endpoint, &self.legacy_endpoint]
            .into_iter()
            .map(|endpoint| endpoint.trim())
            .find(|endpoint| !endpoint.is_empty())
    }

    /// Configured severity, or `Information` when unset. Unknown names also fall back;
    /// validation rejects them before this is consulted.
    pub fn min_severity(&self) -> Severity {
        self.minimum_log_level
            .as_deref()
            .and_then(|level| level.parse().ok())
            .unwrap_or_default()
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }

    /// Path of the rolling file sink, derived from the service name when not configured.
    pub fn resolved_file_log_path(&self) -> String {
        match self.file_log_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => path.to_owned(),
            _ => format!("logs/{}.log", self.service_name.trim()),
        }
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Clone)]
pub struct TelemetryConfigBuilder {
    config: TelemetryConfig,
}

impl TelemetryConfigBuilder {
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.config.service_version = Some(version.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.config.environment = environment.into();
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.enable_metrics = enabled;
        self
    }

    pub fn tracing(mut self, enabled: bool) -> Self {
        self.config.enable_tracing = enabled;
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.config.enable_logging = enabled;
        self
    }

    /// Set the primary OTLP collector endpoint (e.g. `"http://collector:4318"`).
    pub fn collector_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.collector_endpoint = endpoint.into();
        self
    }

    /// Set the endpoint used when no collector endpoint is configured.
    pub fn legacy_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.legacy_endpoint = endpoint.into();
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Set headers to include in OTLP export requests (e.g. authorization tokens).
    pub fn headers(
        mut self,
        headers: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.config.headers = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn export_timeout(mut self, timeout: Duration) -> Self {
        self.config.export_timeout = timeout;
        self
    }

    pub fn metrics_export_interval(mut self, interval: Duration) -> Self {
        self.config.metrics_export_interval = interval;
        self
    }

    pub fn log_aggregation_url(mut self, url: impl Into<String>) -> Self {
        self.config.log_aggregation_url = url.into();
        self
    }

    pub fn console_logging(mut self, enabled: bool) -> Self {
        self.config.enable_console_logging = enabled;
        self
    }

    /// Enable the daily rolling file sink, optionally at an explicit path.
    pub fn file_logging(mut self, path: Option<impl Into<String>>) -> Self {
        self.config.enable_file_logging = true;
        self.config.file_log_path = path.map(Into::into);
        self
    }

    pub fn additional_log_sink(mut self, sink: LogSinkConfig) -> Self {
        self.config.additional_log_sinks.push(sink);
        self
    }

    pub fn scrape_endpoint(mut self, enabled: bool) -> Self {
        self.config.enable_scrape_endpoint = enabled;
        self
    }

    pub fn scrape_port(mut self, port: u32) -> Self {
        self.config.scrape_port = port;
        self
    }

    pub fn scrape_path(mut self, path: impl Into<String>) -> Self {
        self.config.scrape_path = path.into();
        self
    }

    pub fn slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_request_threshold_ms =
            u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn minimum_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.minimum_log_level = Some(level.into());
        self
    }

    /// Set generic labels, attached as resource attributes to every signal.
    pub fn labels(
        mut self,
        labels: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.config.labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Set static properties attached to log records only.
    pub fn log_labels(
        mut self,
        labels: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.config.log_labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn histogram_buckets(mut self, buckets: impl Into<Vec<f64>>) -> Self {
        self.config.histogram_buckets = buckets.into();
        self
    }

    pub fn metric_naming(mut self, naming: MetricNaming) -> Self {
        self.config.metric_naming = naming;
        self
    }

    pub fn runtime_instrumentation(mut self, enabled: bool) -> Self {
        self.config.enable_runtime_instrumentation = enabled;
        self
    }

    pub fn http_client_instrumentation(mut self, enabled: bool) -> Self {
        self.config.enable_http_client_instrumentation = enabled;
        self
    }

    pub fn request_instrumentation(mut self, enabled: bool) -> Self {
        self.config.enable_request_instrumentation = enabled;
        self
    }

    pub fn correlation_id(mut self, enabled: bool) -> Self {
        self.config.enable_correlation_id = enabled;
        self
    }

    /// Build the [`TelemetryConfig`].
    pub fn build(self) -> TelemetryConfig {
        self.config
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("warning".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!("FATAL".parse::<Severity>(), Ok(Severity::Fatal));
        assert_eq!(" Information ".parse::<Severity>(), Ok(Severity::Information));
        assert!("verbose".parse::<Severity>().is_err());
    }

    #[test]
    fn critical_and_fatal_filter_at_error() {
        use tracing::level_filters::LevelFilter;
        assert_eq!(Severity::Critical.level_filter(), LevelFilter::ERROR);
        assert_eq!(Severity::Fatal.level_filter(), LevelFilter::ERROR);
        assert_eq!(Severity::Information.level_filter(), LevelFilter::INFO);
    }

    #[test]
    fn collector_endpoint_wins_over_legacy() {
        let config = TelemetryConfig::builder("svc")
            .legacy_endpoint("http://legacy:4317")
            .collector_endpoint("http://collector:4317")
            .build();

        assert_eq!(config.effective_endpoint(), Some("http://collector:4317"));
    }

    #[test]
    fn empty_collector_falls_back_to_legacy() {
        let config = TelemetryConfig::builder("svc")
            .collector_endpoint("")
            .legacy_endpoint("http://fallback:4317")
            .build();

        assert_eq!(config.effective_endpoint(), Some("http://fallback:4317"));
    }

    #[test]
    fn no_endpoints_resolve_to_none() {
        let config = TelemetryConfig::builder("svc").build();
        assert_eq!(config.effective_endpoint(), None);
    }

    #[test]
    fn file_path_defaults_to_service_name() {
        let config = TelemetryConfig::builder("orders-api")
            .file_logging(None::<String>)
            .build();
        assert_eq!(config.resolved_file_log_path(), "logs/orders-api.log");

        let config = TelemetryConfig::builder("orders-api")
            .file_logging(Some("/var/log/orders/app.log"))
            .build();
        assert_eq!(config.resolved_file_log_path(), "/var/log/orders/app.log");
    }

    #[test]
    fn version_defaults_when_absent_or_blank() {
        let config = TelemetryConfig::builder("svc").build();
        assert_eq!(config.service_version(), "1.0.0");

        let config = TelemetryConfig::builder("svc").service_version("  ").build();
        assert_eq!(config.service_version(), "1.0.0");
    }

    #[test]
    fn metric_naming_applies_prefix_and_overrides() {
        let naming = MetricNaming {
            prefix: Some("shop".to_owned()),
            http_server_duration: Some("inbound.duration".to_owned()),
            http_client_duration: None,
        };

        assert_eq!(
            naming.resolve("http.server.request.duration", naming.http_server_duration.as_ref()),
            "shop.inbound.duration"
        );
        assert_eq!(
            naming.resolve("http.client.request.duration", naming.http_client_duration.as_ref()),
            "shop.http.client.request.duration"
        );
    }

    #[test]
    fn deserializes_partial_document_with_defaults() {
        let config: TelemetryConfig = serde_json::from_str(
            r#"{
                "service_name": "billing",
                "enable_tracing": false,
                "protocol": "grpc",
                "export_timeout": 5000,
                "additional_log_sinks": [
                    { "name": "audit", "endpoint": "http://audit:4318", "enabled": true }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.service_name, "billing");
        assert!(!config.enable_tracing);
        assert!(config.enable_metrics);
        assert_eq!(config.protocol, Protocol::Grpc);
        assert_eq!(config.export_timeout, Duration::from_secs(5));
        assert_eq!(config.scrape_port, 9090);
        assert_eq!(config.additional_log_sinks[0].name, "audit");
    }
}
