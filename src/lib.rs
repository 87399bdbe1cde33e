//! # raccoon-telemetry
//!
//! Config-driven bootstrap for metrics, distributed tracing and structured logging on
//! top of OpenTelemetry and the [`tracing`] crate.
//!
//! One [`TelemetryConfig`] decides which subsystems are switched on. The
//! [`PipelineOrchestrator`] validates it, builds each enabled pipeline, registers every
//! provider with a [`LifecycleManager`] and hands back a [`TelemetryContext`] holding the
//! health probes, instrument bundles and the composed subscriber.
//!
//! ## Quick Start
//!
//! ```no_run
//! # fn main() -> Result<(), raccoon_telemetry::TelemetryError> {
//! let config = raccoon_telemetry::TelemetryConfig::builder("my-service")
//!     .collector_endpoint("http://collector:4318")
//!     .build();
//! let _telemetry = raccoon_telemetry::setup_telemetry(config)?;
//!
//! tracing::info!("This goes to stdout AND the OTel backend");
//! # Ok(())
//! # }
//! ```
//!
//! ## Scoped Usage
//!
//! ```no_run
//! use raccoon_telemetry::{PipelineOrchestrator, TelemetryConfig};
//!
//! # fn main() -> Result<(), raccoon_telemetry::TelemetryError> {
//! let config = TelemetryConfig::builder("my-service")
//!     .metrics(false)
//!     .minimum_log_level("debug")
//!     .build()
//!     .with_env_overrides();
//!
//! let telemetry = PipelineOrchestrator::new().orchestrate(config)?;
//! for probe in telemetry.probes() {
//!     println!("{}: {}", probe.name(), probe.evaluate().status);
//! }
//! if let Some(dispatch) = telemetry.dispatch() {
//!     tracing::dispatcher::with_default(dispatch, || tracing::debug!("scoped"));
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod correlation;
mod env;
mod error;
mod guard;
mod health;
mod instrumentation;
mod lifecycle;
mod orchestrator;
mod providers;
mod registry;
mod resource;
mod subscriber;
mod validation;

pub mod re_exports;

pub use config::{
    LogSinkConfig, MetricNaming, Protocol, Severity, TelemetryConfig, TelemetryConfigBuilder,
    UnknownSeverity,
};
pub use context::{ScrapeEndpoint, TelemetryContext};
pub use correlation::CorrelationId;
pub use error::{ErrorKind, Result, TelemetryError};
pub use guard::TelemetryGuard;
pub use health::{
    subsystem_probe_name, HealthProbe, HealthReport, HealthStatus, CONFIGURATION_PROBE,
};
pub use instrumentation::{
    HttpClientInstruments, HttpClientSpans, HttpServerInstruments, HttpServerSpans,
    Instrumentation, Instruments, RuntimeInstruments,
};
pub use lifecycle::{LifecycleManager, ManagedResource, ResourceKind};
pub use orchestrator::{
    Enricher, PipelineDescriptor, PipelineOrchestrator, SinkDescriptor, Subsystem,
    SubsystemDescriptor,
};
pub use registry::{
    Handle, HandleRegistry, InstrumentFactory, MeterRegistry, TracerRegistry, TracerSource,
};
pub use validation::{is_valid_http_url, validate, validate_subsystem, ValidationResult};

/// Build every enabled pipeline and install the composed subscriber globally.
///
/// Uses fresh registries backed by the OpenTelemetry global providers. The returned
/// context **must** be held for the duration of the application. Dropping it flushes
/// and shuts down every provider.
///
/// Environment variables are not consulted; call
/// [`TelemetryConfig::with_env_overrides`] first to layer them in.
///
/// # Errors
///
/// - `Configuration` if validation fails or a subsystem cannot be built
/// - `IllegalState` if a global tracing subscriber has already been set
pub fn setup_telemetry(config: TelemetryConfig) -> Result<TelemetryContext> {
    let context = PipelineOrchestrator::new().orchestrate(config)?;
    context.install_global_subscriber()?;
    Ok(context)
}
