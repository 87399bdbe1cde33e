//! Health probes describing the state of the telemetry configuration.
//!
//! Probes re-read the shared configuration on every evaluation, so a reloaded config
//! that no longer validates shows up as `Degraded` without rebuilding anything.
//! Mounting probes behind an HTTP route is left to the hosting layer.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::TelemetryConfig;
use crate::orchestrator::Subsystem;
use crate::validation::{validate, validate_subsystem, ValidationResult};

pub const CONFIGURATION_PROBE: &str = "telemetry-configuration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => f.write_str("healthy"),
            HealthStatus::Degraded => f.write_str("degraded"),
            HealthStatus::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

/// Result of evaluating one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub description: String,
    /// Supporting detail, e.g. the validation messages behind a degraded status.
    pub data: Vec<String>,
}

impl HealthReport {
    pub fn healthy(description: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Healthy, description)
    }

    pub fn degraded(description: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Degraded, description)
    }

    pub fn unhealthy(description: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Unhealthy, description)
    }

    pub fn with_data(mut self, data: Vec<String>) -> Self {
        self.data = data;
        self
    }

    fn with_status(status: HealthStatus, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
            data: Vec::new(),
        }
    }
}

type Check = dyn Fn() -> HealthReport + Send + Sync;

/// A named, independently evaluable health check.
#[derive(Clone)]
pub struct HealthProbe {
    name: String,
    tags: Vec<String>,
    check: Arc<Check>,
}

impl HealthProbe {
    pub fn new(
        name: impl Into<String>,
        tags: impl IntoIterator<Item = impl Into<String>>,
        check: impl Fn() -> HealthReport + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            tags: tags.into_iter().map(Into::into).collect(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Run the check. A panic inside the check is reported as `Unhealthy`.
    pub fn evaluate(&self) -> HealthReport {
        panic::catch_unwind(AssertUnwindSafe(|| (self.check)())).unwrap_or_else(|payload| {
            HealthReport::unhealthy(format!(
                "probe `{}` failed while evaluating: {}",
                self.name,
                panic_message(payload.as_ref())
            ))
        })
    }
}

impl fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthProbe")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Name of the probe registered for `subsystem`.
pub fn subsystem_probe_name(subsystem: Subsystem) -> String {
    format!("telemetry-{subsystem}")
}

/// Aggregate probe over every validation rule.
pub(crate) fn configuration_probe(config: Arc<ArcSwap<TelemetryConfig>>) -> HealthProbe {
    HealthProbe::new(CONFIGURATION_PROBE, ["telemetry", "configuration"], move || {
        let current = config.load();
        report_from(validate(&current), "telemetry configuration")
    })
}

/// Probe for one activated subsystem. Reports `Degraded` when the current config
/// disables the subsystem or breaks one of its rules.
pub(crate) fn subsystem_probe(
    subsystem: Subsystem,
    config: Arc<ArcSwap<TelemetryConfig>>,
) -> HealthProbe {
    HealthProbe::new(
        subsystem_probe_name(subsystem),
        ["telemetry".to_owned(), subsystem.to_string()],
        move || {
            let current = config.load();
            if !subsystem.is_enabled(&current) {
                return HealthReport::degraded(format!(
                    "{subsystem} was activated at startup but is now disabled in configuration"
                ));
            }
            report_from(
                validate_subsystem(&current, subsystem),
                &format!("{subsystem} configuration"),
            )
        },
    )
}

fn report_from(result: ValidationResult, subject: &str) -> HealthReport {
    if result.is_valid() {
        HealthReport::healthy(format!("{subject} is valid")).with_data(result.warnings)
    } else {
        let mut data = result.errors;
        data.extend(result.warnings);
        HealthReport::degraded(format!("{subject} has validation errors")).with_data(data)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
