//! Pipeline assembly.
//!
//! The orchestrator validates the configuration, then walks a fixed table of stages
//! (metrics, tracing, logging). Each stage is gated by its own flag and registers what
//! it builds with the [`LifecycleManager`] immediately, so a failure halfway through
//! still leaves earlier resources reachable for teardown.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::Resource;

use crate::config::{Severity, TelemetryConfig};
use crate::context::{ScrapeEndpoint, TelemetryContext};
use crate::error::{Result, TelemetryError};
use crate::health::{self, HealthProbe};
use crate::instrumentation::{
    HttpClientInstruments, HttpClientSpans, HttpServerInstruments, HttpServerSpans,
    Instrumentation, Instruments, RuntimeInstruments,
};
use crate::lifecycle::{LifecycleManager, ManagedResource};
use crate::providers;
use crate::registry::{InstrumentFactory, MeterRegistry, TracerRegistry, TracerSource};
use crate::resource;
use crate::subscriber::{self, BoxedLayer, FileSink};
use crate::validation::{is_valid_http_url, validate};

/// One of the three independently toggleable pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Metrics,
    Tracing,
    Logging,
}

impl Subsystem {
    pub fn is_enabled(self, config: &TelemetryConfig) -> bool {
        match self {
            Subsystem::Metrics => config.is_metrics_enabled(),
            Subsystem::Tracing => config.is_tracing_enabled(),
            Subsystem::Logging => config.is_logging_enabled(),
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::Metrics => f.write_str("metrics"),
            Subsystem::Tracing => f.write_str("tracing"),
            Subsystem::Logging => f.write_str("logging"),
        }
    }
}

/// A destination a subsystem writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkDescriptor {
    Console,
    File { path: String },
    /// The log aggregation endpoint.
    Aggregation { endpoint: String },
    /// A named secondary log endpoint.
    Network { name: String, endpoint: String },
    /// OTLP push export of traces or metrics.
    Otlp { endpoint: String },
    /// Prometheus scrape path for the hosting layer to mount.
    Scrape { port: u16, path: String },
}

/// A contextual enricher attached to log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Enricher {
    Environment,
    ProcessIdentity,
    ThreadIdentity,
    CorrelationId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubsystemDescriptor {
    pub activated: bool,
    /// Effective export endpoint after fallback resolution.
    pub endpoint: Option<String>,
    pub instrumentation: Vec<Instrumentation>,
    pub sinks: Vec<SinkDescriptor>,
}

/// What the orchestrator activated, and the probes to expose.
#[derive(Debug, Clone, Default)]
pub struct PipelineDescriptor {
    pub metrics: SubsystemDescriptor,
    pub tracing: SubsystemDescriptor,
    pub logging: SubsystemDescriptor,
    pub enrichers: Vec<Enricher>,
    pub min_severity: Option<Severity>,
    pub probes: Vec<HealthProbe>,
}

impl PipelineDescriptor {
    pub fn subsystem(&self, subsystem: Subsystem) -> &SubsystemDescriptor {
        match subsystem {
            Subsystem::Metrics => &self.metrics,
            Subsystem::Tracing => &self.tracing,
            Subsystem::Logging => &self.logging,
        }
    }

    fn subsystem_mut(&mut self, subsystem: Subsystem) -> &mut SubsystemDescriptor {
        match subsystem {
            Subsystem::Metrics => &mut self.metrics,
            Subsystem::Tracing => &mut self.tracing,
            Subsystem::Logging => &mut self.logging,
        }
    }

    pub fn probe(&self, name: &str) -> Option<&HealthProbe> {
        self.probes.iter().find(|probe| probe.name() == name)
    }
}

/// Mutable state threaded through the stages.
struct Assembly<'a> {
    config: &'a TelemetryConfig,
    lifecycle: &'a LifecycleManager,
    tracers: &'a Arc<TracerRegistry>,
    meters: &'a Arc<MeterRegistry>,
    resource: Resource,
    descriptor: PipelineDescriptor,
    layers: Vec<BoxedLayer>,
    instruments: Instruments,
    tracer: Option<Arc<TracerSource>>,
    meter: Option<Arc<InstrumentFactory>>,
    scrape: Option<ScrapeEndpoint>,
    network_log_endpoints: Vec<String>,
}

impl Assembly<'_> {
    fn register(&self, resource: Arc<dyn ManagedResource>) -> anyhow::Result<()> {
        self.lifecycle.register(resource)?;
        Ok(())
    }
}

type Build = fn(&mut Assembly<'_>) -> anyhow::Result<()>;

struct Stage {
    subsystem: Subsystem,
    enabled: fn(&TelemetryConfig) -> bool,
    build: Build,
}

const STAGES: [Stage; 3] = [
    Stage {
        subsystem: Subsystem::Metrics,
        enabled: TelemetryConfig::is_metrics_enabled,
        build: build_metrics,
    },
    Stage {
        subsystem: Subsystem::Tracing,
        enabled: TelemetryConfig::is_tracing_enabled,
        build: build_tracing,
    },
    Stage {
        subsystem: Subsystem::Logging,
        enabled: TelemetryConfig::is_logging_enabled,
        build: build_logging,
    },
];

struct MetricInstrumentation {
    instrumentation: Instrumentation,
    enabled: fn(&TelemetryConfig) -> bool,
    attach: fn(&mut Instruments, &opentelemetry::metrics::Meter, &TelemetryConfig),
}

const METRIC_INSTRUMENTATION: [MetricInstrumentation; 3] = [
    MetricInstrumentation {
        instrumentation: Instrumentation::Runtime,
        enabled: runtime_instrumentation_enabled,
        attach: |instruments, meter, config| {
            instruments.runtime = Some(RuntimeInstruments::new(meter, config));
        },
    },
    MetricInstrumentation {
        instrumentation: Instrumentation::HttpClient,
        enabled: http_client_instrumentation_enabled,
        attach: |instruments, meter, config| {
            instruments.http_client = Some(HttpClientInstruments::new(meter, config));
        },
    },
    MetricInstrumentation {
        instrumentation: Instrumentation::IncomingRequests,
        enabled: request_instrumentation_enabled,
        attach: |instruments, meter, config| {
            instruments.http_server = Some(HttpServerInstruments::new(meter, config));
        },
    },
];

struct TraceInstrumentation {
    instrumentation: Instrumentation,
    enabled: fn(&TelemetryConfig) -> bool,
    attach: fn(&mut Instruments, &TelemetryConfig),
}

const TRACE_INSTRUMENTATION: [TraceInstrumentation; 2] = [
    TraceInstrumentation {
        instrumentation: Instrumentation::HttpClient,
        enabled: http_client_instrumentation_enabled,
        attach: |instruments, _| instruments.client_spans = Some(HttpClientSpans),
    },
    TraceInstrumentation {
        instrumentation: Instrumentation::IncomingRequests,
        enabled: request_instrumentation_enabled,
        attach: |instruments, config| {
            instruments.server_spans = Some(HttpServerSpans::new(config.enable_correlation_id));
        },
    },
];

struct LogSinkStage {
    enabled: fn(&TelemetryConfig) -> bool,
    attach: Build,
}

const LOG_SINKS: [LogSinkStage; 4] = [
    LogSinkStage {
        enabled: |config| config.enable_console_logging,
        attach: attach_console_sink,
    },
    LogSinkStage {
        enabled: |config| !config.log_aggregation_url.trim().is_empty(),
        attach: attach_aggregation_sink,
    },
    LogSinkStage {
        enabled: |config| config.enable_file_logging,
        attach: attach_file_sink,
    },
    LogSinkStage {
        enabled: |config| config.additional_log_sinks.iter().any(|sink| sink.enabled),
        attach: attach_additional_sinks,
    },
];

fn runtime_instrumentation_enabled(config: &TelemetryConfig) -> bool {
    config.enable_runtime_instrumentation
}

fn http_client_instrumentation_enabled(config: &TelemetryConfig) -> bool {
    config.enable_http_client_instrumentation
}

fn request_instrumentation_enabled(config: &TelemetryConfig) -> bool {
    config.enable_request_instrumentation
}

/// Builds telemetry pipelines from a [`TelemetryConfig`].
///
/// The lifecycle manager and both handle registries are injected, so tests and hosts
/// can share or inspect them. [`PipelineOrchestrator::new`] creates fresh ones backed by
/// the OpenTelemetry global providers.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    lifecycle: Arc<LifecycleManager>,
    tracers: Arc<TracerRegistry>,
    meters: Arc<MeterRegistry>,
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOrchestrator {
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(LifecycleManager::new()),
            Arc::new(TracerRegistry::tracers()),
            Arc::new(MeterRegistry::meters()),
        )
    }

    pub fn with_parts(
        lifecycle: Arc<LifecycleManager>,
        tracers: Arc<TracerRegistry>,
        meters: Arc<MeterRegistry>,
    ) -> Self {
        Self {
            lifecycle,
            tracers,
            meters,
        }
    }

    /// Where built resources are registered; tear it down after a failed
    /// [`orchestrate`](Self::orchestrate) to release partial work.
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn tracers(&self) -> &Arc<TracerRegistry> {
        &self.tracers
    }

    pub fn meters(&self) -> &Arc<MeterRegistry> {
        &self.meters
    }

    /// Validate `config` and build every enabled subsystem.
    ///
    /// # Errors
    ///
    /// - `Configuration` if validation finds errors (nothing is built), or if a
    ///   subsystem fails to build (earlier resources stay in the lifecycle manager)
    /// - `IllegalState` if the lifecycle manager was already torn down
    pub fn orchestrate(&self, config: TelemetryConfig) -> Result<TelemetryContext> {
        let validation = validate(&config);
        if !validation.is_valid() {
            return Err(TelemetryError::Configuration {
                errors: validation.errors,
                warnings: validation.warnings,
                source: None,
            });
        }
        for warning in &validation.warnings {
            tracing::warn!(
                service = %config.service_name,
                "telemetry configuration warning: {warning}"
            );
        }

        if self.lifecycle.is_torn_down() {
            return Err(TelemetryError::IllegalState(
                "lifecycle manager has already been torn down".to_owned(),
            ));
        }

        let (mut descriptor, layers, instruments, tracer, meter, scrape) = {
            let mut assembly = Assembly {
                config: &config,
                lifecycle: &self.lifecycle,
                tracers: &self.tracers,
                meters: &self.meters,
                resource: resource::build_resource(&config),
                descriptor: PipelineDescriptor::default(),
                layers: Vec::new(),
                instruments: Instruments::default(),
                tracer: None,
                meter: None,
                scrape: None,
                network_log_endpoints: Vec::new(),
            };

            for stage in &STAGES {
                if !(stage.enabled)(&config) {
                    continue;
                }
                (stage.build)(&mut assembly)
                    .with_context(|| format!("Failed to build the {} pipeline", stage.subsystem))
                    .map_err(|e| TelemetryError::build_failure(e, validation.warnings.clone()))?;
                assembly.descriptor.subsystem_mut(stage.subsystem).activated = true;
                tracing::debug!(subsystem = %stage.subsystem, "telemetry subsystem activated");
            }

            (
                assembly.descriptor,
                assembly.layers,
                assembly.instruments,
                assembly.tracer,
                assembly.meter,
                assembly.scrape,
            )
        };

        // Without an explicit level the filter falls back to RUST_LOG.
        let severity = config
            .minimum_log_level
            .is_some()
            .then(|| config.min_severity());
        let dispatch = (!layers.is_empty())
            .then(|| subscriber::compose(layers, subscriber::severity_filter(severity)));

        let shared_config = Arc::new(ArcSwap::from_pointee(config));
        descriptor.probes = register_probes(&descriptor, &shared_config);

        Ok(TelemetryContext::new(
            descriptor,
            validation.warnings,
            instruments,
            scrape,
            tracer,
            meter,
            dispatch,
            shared_config,
            Arc::clone(&self.lifecycle),
        ))
    }
}

fn register_probes(
    descriptor: &PipelineDescriptor,
    config: &Arc<ArcSwap<TelemetryConfig>>,
) -> Vec<HealthProbe> {
    let mut probes = vec![health::configuration_probe(Arc::clone(config))];
    probes.extend(
        STAGES
            .iter()
            .map(|stage| stage.subsystem)
            .filter(|subsystem| descriptor.subsystem(*subsystem).activated)
            .map(|subsystem| health::subsystem_probe(subsystem, Arc::clone(config))),
    );
    probes
}

fn build_metrics(assembly: &mut Assembly<'_>) -> anyhow::Result<()> {
    let config = assembly.config;
    let endpoint = config.effective_endpoint();

    // Endpoint URLs are only validated with tracing on; metrics export shares them.
    if let Some(endpoint) = endpoint.filter(|endpoint| !is_valid_http_url(endpoint)) {
        anyhow::bail!(
            "Metrics export endpoint `{endpoint}` is not a valid absolute http or https URL"
        );
    }

    let provider =
        providers::meter::build_meter_provider(assembly.resource.clone(), config, endpoint)
            .context("Failed to initialize meter provider")?;
    assembly.register(Arc::new(provider))?;
    assembly.register(Arc::clone(assembly.meters) as Arc<dyn ManagedResource>)?;

    let factory = assembly
        .meters
        .get_or_create(&config.service_name, Some(config.service_version()))?;

    let mut attached = Vec::new();
    for entry in &METRIC_INSTRUMENTATION {
        if (entry.enabled)(config) {
            (entry.attach)(&mut assembly.instruments, factory.get(), config);
            attached.push(entry.instrumentation);
        }
    }

    let mut sinks = Vec::new();
    if let Some(endpoint) = endpoint {
        sinks.push(SinkDescriptor::Otlp {
            endpoint: endpoint.to_owned(),
        });
    }
    if config.enable_scrape_endpoint {
        let scrape = ScrapeEndpoint {
            port: u16::try_from(config.scrape_port).with_context(|| {
                format!("Scrape port {} does not fit in u16", config.scrape_port)
            })?,
            path: config.scrape_path.clone(),
        };
        sinks.push(SinkDescriptor::Scrape {
            port: scrape.port,
            path: scrape.path.clone(),
        });
        assembly.scrape = Some(scrape);
    }

    assembly.meter = Some(factory);
    let descriptor = &mut assembly.descriptor.metrics;
    descriptor.endpoint = endpoint.map(str::to_owned);
    descriptor.instrumentation = attached;
    descriptor.sinks = sinks;
    Ok(())
}

fn build_tracing(assembly: &mut Assembly<'_>) -> anyhow::Result<()> {
    let config = assembly.config;

    // W3C trace context propagation for distributed tracing
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let endpoint = config.effective_endpoint();
    let provider =
        providers::tracer::build_tracer_provider(assembly.resource.clone(), config, endpoint)
            .context("Failed to initialize tracer provider")?;
    assembly.register(Arc::new(provider.clone()))?;
    assembly.register(Arc::clone(assembly.tracers) as Arc<dyn ManagedResource>)?;

    let source = assembly
        .tracers
        .get_or_create(&config.service_name, Some(config.service_version()))?;
    assembly
        .layers
        .push(subscriber::otel_trace_layer(&provider, &config.service_name));

    let mut attached = Vec::new();
    for entry in &TRACE_INSTRUMENTATION {
        if (entry.enabled)(config) {
            (entry.attach)(&mut assembly.instruments, config);
            attached.push(entry.instrumentation);
        }
    }

    assembly.tracer = Some(source);
    let descriptor = &mut assembly.descriptor.tracing;
    descriptor.endpoint = endpoint.map(str::to_owned);
    descriptor.instrumentation = attached;
    descriptor.sinks = endpoint
        .map(|endpoint| SinkDescriptor::Otlp {
            endpoint: endpoint.to_owned(),
        })
        .into_iter()
        .collect();
    Ok(())
}

fn build_logging(assembly: &mut Assembly<'_>) -> anyhow::Result<()> {
    let config = assembly.config;

    for stage in &LOG_SINKS {
        if (stage.enabled)(config) {
            (stage.attach)(assembly)?;
        }
    }

    if !assembly.network_log_endpoints.is_empty() {
        let endpoints: Vec<&str> = assembly
            .network_log_endpoints
            .iter()
            .map(String::as_str)
            .collect();
        let provider = providers::logger::build_logger_provider(
            resource::build_log_resource(config),
            config,
            &endpoints,
        )
        .context("Failed to initialize logger provider")?;
        assembly.register(Arc::new(provider.clone()))?;
        assembly.layers.push(subscriber::otel_log_layer(&provider));
    }

    let mut enrichers = vec![
        Enricher::Environment,
        Enricher::ProcessIdentity,
        Enricher::ThreadIdentity,
    ];
    if config.enable_correlation_id {
        enrichers.push(Enricher::CorrelationId);
    }

    assembly.descriptor.enrichers = enrichers;
    assembly.descriptor.min_severity = Some(config.min_severity());
    let aggregation = config.log_aggregation_url.trim();
    assembly.descriptor.logging.endpoint =
        (!aggregation.is_empty()).then(|| aggregation.to_owned());
    Ok(())
}

fn attach_console_sink(assembly: &mut Assembly<'_>) -> anyhow::Result<()> {
    assembly.layers.push(subscriber::console_layer());
    assembly.descriptor.logging.sinks.push(SinkDescriptor::Console);
    Ok(())
}

fn attach_aggregation_sink(assembly: &mut Assembly<'_>) -> anyhow::Result<()> {
    let endpoint = assembly.config.log_aggregation_url.trim().to_owned();
    assembly.network_log_endpoints.push(endpoint.clone());
    assembly
        .descriptor
        .logging
        .sinks
        .push(SinkDescriptor::Aggregation { endpoint });
    Ok(())
}

fn attach_file_sink(assembly: &mut Assembly<'_>) -> anyhow::Result<()> {
    let path = assembly.config.resolved_file_log_path();
    let (sink, writer) = FileSink::open(&path)?;
    assembly.register(Arc::new(sink))?;
    assembly.layers.push(subscriber::file_layer(
        writer,
        assembly.config.enable_correlation_id,
    ));
    assembly
        .descriptor
        .logging
        .sinks
        .push(SinkDescriptor::File { path });
    Ok(())
}

fn attach_additional_sinks(assembly: &mut Assembly<'_>) -> anyhow::Result<()> {
    let config = assembly.config;
    for sink in config.additional_log_sinks.iter().filter(|sink| sink.enabled) {
        let endpoint = sink.endpoint.trim().to_owned();
        assembly.network_log_endpoints.push(endpoint.clone());
        assembly.descriptor.logging.sinks.push(SinkDescriptor::Network {
            name: sink.name.clone(),
            endpoint,
        });
    }
    Ok(())
}
