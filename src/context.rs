use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::Dispatch;

use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::guard::TelemetryGuard;
use crate::health::HealthProbe;
use crate::instrumentation::Instruments;
use crate::lifecycle::LifecycleManager;
use crate::orchestrator::PipelineDescriptor;
use crate::registry::{InstrumentFactory, TracerSource};
use crate::subscriber;

/// Where the hosting layer should mount the Prometheus scrape route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeEndpoint {
    pub port: u16,
    pub path: String,
}

/// Everything a successful [`orchestrate`](crate::PipelineOrchestrator::orchestrate) built.
///
/// Holds the [`TelemetryGuard`]; dropping the context tears the pipelines down.
#[must_use = "dropping the TelemetryContext immediately tears down every telemetry provider"]
#[derive(Debug)]
pub struct TelemetryContext {
    descriptor: PipelineDescriptor,
    warnings: Vec<String>,
    instruments: Instruments,
    scrape_endpoint: Option<ScrapeEndpoint>,
    tracer: Option<Arc<TracerSource>>,
    meter: Option<Arc<InstrumentFactory>>,
    dispatch: Option<Dispatch>,
    config: Arc<ArcSwap<TelemetryConfig>>,
    guard: TelemetryGuard,
}

impl TelemetryContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        descriptor: PipelineDescriptor,
        warnings: Vec<String>,
        instruments: Instruments,
        scrape_endpoint: Option<ScrapeEndpoint>,
        tracer: Option<Arc<TracerSource>>,
        meter: Option<Arc<InstrumentFactory>>,
        dispatch: Option<Dispatch>,
        config: Arc<ArcSwap<TelemetryConfig>>,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            descriptor,
            warnings,
            instruments,
            scrape_endpoint,
            tracer,
            meter,
            dispatch,
            config,
            guard: TelemetryGuard::new(lifecycle),
        }
    }

    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    /// Validation warnings; none of them blocked startup.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn probes(&self) -> &[HealthProbe] {
        &self.descriptor.probes
    }

    pub fn instruments(&self) -> &Instruments {
        &self.instruments
    }

    pub fn scrape_endpoint(&self) -> Option<&ScrapeEndpoint> {
        self.scrape_endpoint.as_ref()
    }

    /// The service's tracer source, when tracing is active.
    pub fn tracer(&self) -> Option<&Arc<TracerSource>> {
        self.tracer.as_ref()
    }

    /// The service's instrument factory, when metrics are active.
    pub fn meter(&self) -> Option<&Arc<InstrumentFactory>> {
        self.meter.as_ref()
    }

    /// The composed subscriber, for scoped use with [`tracing::dispatcher::with_default`].
    /// `None` when no subscriber layer was activated.
    pub fn dispatch(&self) -> Option<&Dispatch> {
        self.dispatch.as_ref()
    }

    /// Snapshot of the configuration the probes currently evaluate.
    pub fn config(&self) -> Arc<TelemetryConfig> {
        self.config.load_full()
    }

    /// Swap in a new configuration for the health probes.
    ///
    /// Pipelines are not rebuilt; probes report `Degraded` when the new configuration
    /// disables or breaks an activated subsystem.
    pub fn reload_config(&self, config: TelemetryConfig) {
        tracing::info!(service = %config.service_name, "telemetry configuration reloaded");
        self.config.store(Arc::new(config));
    }

    /// Install the composed subscriber as the process-wide default.
    ///
    /// Does nothing when no layer was activated.
    ///
    /// # Errors
    ///
    /// `IllegalState` if a global subscriber has already been set.
    pub fn install_global_subscriber(&self) -> Result<()> {
        match &self.dispatch {
            Some(dispatch) => subscriber::install(dispatch.clone())
                .map_err(|e| TelemetryError::IllegalState(format!("{e:#}"))),
            None => Ok(()),
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        self.guard.lifecycle()
    }

    /// Tear down every managed resource now and return the disposal faults.
    ///
    /// Safe to call multiple times; dropping the context afterwards is a no-op.
    pub fn shutdown(&mut self) -> Vec<TelemetryError> {
        self.guard.shutdown()
    }

    /// Keep only the teardown guard, dropping handles, probes and the dispatcher.
    pub fn into_guard(self) -> TelemetryGuard {
        self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthStatus, CONFIGURATION_PROBE};
    use crate::orchestrator::PipelineOrchestrator;

    fn context() -> TelemetryContext {
        let config = TelemetryConfig::builder("billing")
            .tracing(false)
            .logging(false)
            .build();
        PipelineOrchestrator::new().orchestrate(config).unwrap()
    }

    #[test]
    fn reload_updates_probe_view_without_rebuilding() {
        let context = context();
        let probe = context.descriptor().probe("telemetry-metrics").unwrap().clone();
        assert_eq!(probe.evaluate().status, HealthStatus::Healthy);

        context.reload_config(TelemetryConfig {
            scrape_port: 0,
            ..(*context.config()).clone()
        });

        assert_eq!(context.config().scrape_port, 0);
        assert_eq!(probe.evaluate().status, HealthStatus::Degraded);
        let aggregate = context.descriptor().probe(CONFIGURATION_PROBE).unwrap();
        assert_eq!(aggregate.evaluate().status, HealthStatus::Degraded);
        assert!(context.descriptor().metrics.activated);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut context = context();

        assert!(context.shutdown().is_empty());
        assert!(context.lifecycle().is_torn_down());
        assert!(context.shutdown().is_empty());
        assert!(context.meter().unwrap().is_disposed());
    }

    #[test]
    fn guard_outlives_context() {
        let context = context();
        let meter = Arc::clone(context.meter().unwrap());

        let guard = context.into_guard();
        assert!(!meter.is_disposed());
        drop(guard);

        assert!(meter.is_disposed());
    }

    #[test]
    fn install_without_layers_is_noop() {
        let context = context();
        assert!(context.install_global_subscriber().is_ok());
    }
}
