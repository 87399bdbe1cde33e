use std::collections::BTreeMap;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

use crate::config::TelemetryConfig;

/// Build the [`Resource`] shared by every signal: service identity, the environment and
/// process-identity enrichers, and the generic labels.
pub(crate) fn build_resource(config: &TelemetryConfig) -> Resource {
    resource_with(config, &BTreeMap::new())
}

/// Build the resource for log records: the shared resource plus the log-specific static
/// properties. Log labels win over generic labels with the same key.
pub(crate) fn build_log_resource(config: &TelemetryConfig) -> Resource {
    resource_with(config, &config.log_labels)
}

fn resource_with(config: &TelemetryConfig, extra: &BTreeMap<String, String>) -> Resource {
    let mut kvs: Vec<KeyValue> = Vec::with_capacity(config.labels.len() + extra.len() + 5);
    kvs.push(KeyValue::new("service.name", config.service_name.clone()));
    kvs.push(KeyValue::new("service.version", config.service_version().to_owned()));
    kvs.push(KeyValue::new("deployment.environment", config.environment.clone()));
    kvs.push(KeyValue::new("process.pid", i64::from(std::process::id())));
    if let Some(executable) = executable_name() {
        kvs.push(KeyValue::new("process.executable.name", executable));
    }

    for (key, value) in config.labels.iter().chain(extra) {
        kvs.push(KeyValue::new(key.clone(), value.clone()));
    }

    Resource::builder().with_attributes(kvs).build()
}

fn executable_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.file_name()?.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use opentelemetry::{Key, Value};

    use super::*;

    fn attribute(resource: &Resource, key: &'static str) -> Option<Value> {
        resource.get(&Key::from_static_str(key))
    }

    #[test]
    fn carries_service_identity_and_enrichers() {
        let config = TelemetryConfig::builder("inventory")
            .service_version("4.2.0")
            .environment("staging")
            .labels([("team", "logistics")])
            .build();

        let resource = build_resource(&config);

        assert_eq!(attribute(&resource, "service.name"), Some(Value::from("inventory")));
        assert_eq!(attribute(&resource, "service.version"), Some(Value::from("4.2.0")));
        assert_eq!(
            attribute(&resource, "deployment.environment"),
            Some(Value::from("staging"))
        );
        assert_eq!(
            attribute(&resource, "process.pid"),
            Some(Value::I64(i64::from(std::process::id())))
        );
        assert_eq!(attribute(&resource, "team"), Some(Value::from("logistics")));
    }

    #[test]
    fn log_resource_adds_log_labels() {
        let config = TelemetryConfig::builder("inventory")
            .labels([("team", "logistics")])
            .log_labels([("team", "audit"), ("pipeline", "orders")])
            .build();

        assert_eq!(attribute(&build_resource(&config), "pipeline"), None);

        let resource = build_log_resource(&config);
        assert_eq!(attribute(&resource, "pipeline"), Some(Value::from("orders")));
        assert_eq!(attribute(&resource, "team"), Some(Value::from("audit")));
    }
}
