//! Configuration validation.
//!
//! Validation is a pure function of the config. Problems are split into blocking
//! errors and advisory warnings; only errors stop the orchestrator. Rules that belong
//! to a single subsystem are grouped so health probes can re-run just that group.

use std::collections::BTreeMap;

use url::Url;

use crate::config::{Severity, TelemetryConfig};
use crate::orchestrator::Subsystem;

const MAX_SERVICE_NAME_LEN: usize = 50;
const MAX_LABEL_KEY_LEN: usize = 50;
const MAX_LABEL_VALUE_LEN: usize = 200;
const MAX_PORT: u32 = 65_535;
const FIRST_UNPRIVILEGED_PORT: u32 = 1024;

/// Outcome of a single [`validate`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Validate every rule against `config`.
pub fn validate(config: &TelemetryConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    validate_service(config, &mut result);
    validate_metrics(config, &mut result);
    validate_tracing(config, &mut result);
    validate_logging(config, &mut result);
    result
}

/// Validate the service-wide rules plus the rules owned by `subsystem`.
pub fn validate_subsystem(config: &TelemetryConfig, subsystem: Subsystem) -> ValidationResult {
    let mut result = ValidationResult::default();
    validate_service(config, &mut result);
    match subsystem {
        Subsystem::Metrics => validate_metrics(config, &mut result),
        Subsystem::Tracing => validate_tracing(config, &mut result),
        Subsystem::Logging => validate_logging(config, &mut result),
    }
    result
}

/// An absolute URI whose scheme is exactly `http` or `https`.
pub fn is_valid_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

fn validate_service(config: &TelemetryConfig, result: &mut ValidationResult) {
    let name = config.service_name.trim();
    if name.is_empty() {
        result.error("service name must not be empty");
    } else if name.chars().count() > MAX_SERVICE_NAME_LEN {
        result.warning(format!(
            "service name `{name}` is longer than {MAX_SERVICE_NAME_LEN} characters"
        ));
    }

    validate_labels("labels", &config.labels, result);
}

fn validate_metrics(config: &TelemetryConfig, result: &mut ValidationResult) {
    let port = config.scrape_port;
    if !(1..=MAX_PORT).contains(&port) {
        result.error(format!(
            "scrape port {port} is out of range; it must be between 1 and {MAX_PORT}"
        ));
    } else if port > 1 && port < FIRST_UNPRIVILEGED_PORT {
        result.warning(format!(
            "scrape port {port} is a privileged port and may require elevated privileges"
        ));
    }

    let buckets = &config.histogram_buckets;
    if buckets.iter().any(|bound| !bound.is_finite()) {
        result.error("histogram buckets must be finite numbers");
    } else if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
        result.error("histogram buckets must be strictly ascending");
    }

    let naming = &config.metric_naming;
    for (field, value) in [
        ("prefix", &naming.prefix),
        ("http_server_duration", &naming.http_server_duration),
        ("http_client_duration", &naming.http_client_duration),
    ] {
        if let Some(value) = value {
            if value.trim().is_empty() || value.chars().any(char::is_whitespace) {
                result.error(format!(
                    "metric naming override `{field}` must be non-empty and contain no whitespace"
                ));
            }
        }
    }

    if config.enable_request_instrumentation && config.slow_request_threshold_ms == 0 {
        result.warning("slow-request threshold is 0ms; every request will be counted as slow");
    }
}

fn validate_tracing(config: &TelemetryConfig, result: &mut ValidationResult) {
    if !config.enable_tracing {
        return;
    }

    validate_url("collector endpoint", &config.collector_endpoint, result);
    validate_url("legacy endpoint", &config.legacy_endpoint, result);
}

fn validate_logging(config: &TelemetryConfig, result: &mut ValidationResult) {
    validate_url("log aggregation URL", &config.log_aggregation_url, result);

    if let Some(level) = config.minimum_log_level.as_deref() {
        if level.parse::<Severity>().is_err() {
            let allowed = Severity::ALL.map(Severity::as_str).join(", ");
            result.error(format!(
                "minimum log level `{level}` is not one of: {allowed}"
            ));
        }
    }

    if config.enable_file_logging {
        if let Some(path) = config.file_log_path.as_deref() {
            if path.trim().is_empty() {
                result.warning(format!(
                    "file log path is blank; defaulting to `{}`",
                    config.resolved_file_log_path()
                ));
            }
        }
    }

    for (index, sink) in config.additional_log_sinks.iter().enumerate() {
        if !sink.enabled {
            continue;
        }
        if sink.name.trim().is_empty() {
            result.error(format!("additional log sink #{index} must have a name"));
        }
        if sink.endpoint.trim().is_empty() {
            result.error(format!(
                "additional log sink `{}` is enabled but has no endpoint",
                sink.name
            ));
        } else {
            validate_url(
                &format!("additional log sink `{}` endpoint", sink.name),
                &sink.endpoint,
                result,
            );
        }
    }

    validate_labels("log labels", &config.log_labels, result);
}

fn validate_url(field: &str, value: &str, result: &mut ValidationResult) {
    if value.is_empty() {
        return;
    }
    if !is_valid_http_url(value) {
        result.error(format!(
            "{field} `{value}` is not a valid absolute http or https URL"
        ));
    }
}

fn validate_labels(
    map_name: &str,
    labels: &BTreeMap<String, String>,
    result: &mut ValidationResult,
) {
    for (key, value) in labels {
        if key.trim().is_empty() {
            result.error(format!("{map_name} contain an empty key"));
            continue;
        }
        if key.chars().count() > MAX_LABEL_KEY_LEN {
            result.warning(format!(
                "{map_name} key `{key}` is longer than {MAX_LABEL_KEY_LEN} characters"
            ));
        }
        if value.is_empty() {
            result.warning(format!("{map_name} key `{key}` has an empty value"));
        } else if value.chars().count() > MAX_LABEL_VALUE_LEN {
            result.warning(format!(
                "{map_name} key `{key}` has a value longer than {MAX_LABEL_VALUE_LEN} characters"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogSinkConfig;

    fn baseline() -> TelemetryConfig {
        TelemetryConfig::builder("svc")
            .scrape_port(9090)
            .tracing(false)
            .build()
    }

    #[test]
    fn happy_path_has_no_findings() {
        let result = validate(&baseline());

        assert!(result.is_valid());
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn empty_name_and_out_of_range_port_block() {
        let config = TelemetryConfig {
            service_name: String::new(),
            scrape_port: 99_999,
            ..baseline()
        };

        let result = validate(&config);

        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("between 1 and 65535")));
        assert!(result.errors.iter().any(|e| e.contains("service name must not be empty")));
    }

    #[test]
    fn port_zero_is_out_of_range() {
        let config = TelemetryConfig {
            scrape_port: 0,
            ..baseline()
        };
        assert!(!validate(&config).is_valid());
    }

    #[test]
    fn privileged_port_is_only_a_warning() {
        let config = TelemetryConfig {
            scrape_port: 80,
            ..baseline()
        };

        let result = validate(&config);

        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("privileged port"));
    }

    #[test]
    fn port_one_is_silently_accepted() {
        let config = TelemetryConfig {
            scrape_port: 1,
            ..baseline()
        };
        let result = validate(&config);
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn long_service_name_warns() {
        let config = TelemetryConfig {
            service_name: "s".repeat(51),
            ..baseline()
        };

        let result = validate(&config);

        assert!(result.is_valid());
        assert!(result.warnings[0].contains("longer than 50"));
    }

    #[test]
    fn tracing_endpoints_are_only_checked_when_tracing_is_enabled() {
        let disabled = TelemetryConfig {
            collector_endpoint: "not a url".to_owned(),
            ..baseline()
        };
        assert!(validate(&disabled).is_valid());

        let enabled = TelemetryConfig {
            enable_tracing: true,
            ..disabled
        };
        let result = validate(&enabled);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("collector endpoint `not a url`"));
    }

    #[test]
    fn legacy_endpoint_scheme_must_be_http() {
        let config = TelemetryConfig {
            enable_tracing: true,
            legacy_endpoint: "ftp://collector:21".to_owned(),
            ..baseline()
        };
        let result = validate(&config);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("legacy endpoint"));
    }

    #[test]
    fn aggregation_url_is_checked_unconditionally() {
        let config = TelemetryConfig {
            enable_logging: false,
            log_aggregation_url: "/relative/path".to_owned(),
            ..baseline()
        };
        let result = validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("log aggregation URL"));
    }

    #[test]
    fn unknown_severity_is_rejected() {
        let config = TelemetryConfig {
            minimum_log_level: Some("verbose".to_owned()),
            ..baseline()
        };
        let result = validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("Trace, Debug, Information"));

        let config = TelemetryConfig {
            minimum_log_level: Some("critical".to_owned()),
            ..baseline()
        };
        assert!(validate(&config).is_valid());
    }

    #[test]
    fn label_rules_split_errors_and_warnings() {
        let config = TelemetryConfig::builder("svc")
            .tracing(false)
            .labels([
                (" ".to_owned(), "x".to_owned()),
                ("k".repeat(51), "v".to_owned()),
                ("empty".to_owned(), String::new()),
            ])
            .log_labels([("huge".to_owned(), "v".repeat(201))])
            .build();

        let result = validate(&config);

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("empty key"));
        assert_eq!(result.warnings.len(), 3);
        assert!(result.warnings.iter().any(|w| w.contains("longer than 50")));
        assert!(result.warnings.iter().any(|w| w.contains("empty value")));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.starts_with("log labels") && w.contains("longer than 200")));
    }

    #[test]
    fn unsorted_buckets_are_rejected() {
        let config = TelemetryConfig::builder("svc")
            .tracing(false)
            .histogram_buckets(vec![0.1, 0.5, 0.5, 1.0])
            .build();
        let result = validate(&config);
        assert!(result.errors[0].contains("strictly ascending"));
    }

    #[test]
    fn enabled_sinks_need_a_valid_endpoint() {
        let config = TelemetryConfig::builder("svc")
            .tracing(false)
            .additional_log_sink(LogSinkConfig::new("audit", "audit-host:4318"))
            .additional_log_sink(LogSinkConfig {
                enabled: false,
                ..LogSinkConfig::new("", "garbage")
            })
            .build();

        let result = validate(&config);

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("additional log sink `audit` endpoint"));
    }

    #[test]
    fn subsystem_validation_only_runs_owned_rules() {
        let config = TelemetryConfig {
            scrape_port: 0,
            minimum_log_level: Some("loud".to_owned()),
            ..baseline()
        };

        let metrics = validate_subsystem(&config, Subsystem::Metrics);
        assert_eq!(metrics.errors.len(), 1);
        assert!(metrics.errors[0].contains("scrape port"));

        let logging = validate_subsystem(&config, Subsystem::Logging);
        assert_eq!(logging.errors.len(), 1);
        assert!(logging.errors[0].contains("minimum log level"));

        assert!(validate_subsystem(&config, Subsystem::Tracing).is_valid());
    }

    #[test]
    fn url_helper_requires_absolute_http_scheme() {
        assert!(is_valid_http_url("http://collector:4317"));
        assert!(is_valid_http_url("https://logs.example.com/ingest"));
        assert!(!is_valid_http_url("collector:4317"));
        assert!(!is_valid_http_url("grpc://collector:4317"));
        assert!(!is_valid_http_url("/v1/logs"));
        assert!(!is_valid_http_url(""));
    }
}
