use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::TelemetryError;

/// Tag used to group resources in a [`LifecycleManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    TracerProvider,
    MeterProvider,
    LoggerProvider,
    TracerSource,
    InstrumentFactory,
    LogSink,
    Custom(&'static str),
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::TracerProvider => f.write_str("tracer provider"),
            ResourceKind::MeterProvider => f.write_str("meter provider"),
            ResourceKind::LoggerProvider => f.write_str("logger provider"),
            ResourceKind::TracerSource => f.write_str("tracer source"),
            ResourceKind::InstrumentFactory => f.write_str("instrument factory"),
            ResourceKind::LogSink => f.write_str("log sink"),
            ResourceKind::Custom(name) => f.write_str(name),
        }
    }
}

/// Anything that needs explicit teardown.
pub trait ManagedResource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Human-readable name used when reporting disposal faults.
    fn label(&self) -> String {
        self.kind().to_string()
    }

    fn dispose(&self) -> anyhow::Result<()>;
}

#[derive(Default)]
struct Inner {
    resources: Vec<Arc<dyn ManagedResource>>,
    torn_down: bool,
}

/// Ordered collection of resources, disposed last-registered-first on [`teardown`].
///
/// [`teardown`]: LifecycleManager::teardown
#[derive(Default)]
pub struct LifecycleManager {
    inner: Mutex<Inner>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `resource`.
    ///
    /// After teardown the resource is disposed on the spot instead of being retained;
    /// a disposal failure is returned in that case.
    pub fn register(&self, resource: Arc<dyn ManagedResource>) -> Result<(), TelemetryError> {
        let mut inner = self.lock();
        if inner.torn_down {
            drop(inner);
            tracing::debug!(
                resource = %resource.label(),
                "disposing resource registered after teardown"
            );
            return resource
                .dispose()
                .map_err(|e| TelemetryError::disposal(resource.label(), e));
        }
        inner.resources.push(resource);
        Ok(())
    }

    /// Forget `resource` without disposing it. No-op when it is not registered.
    pub fn unregister(&self, resource: &Arc<dyn ManagedResource>) {
        self.lock()
            .resources
            .retain(|registered| !Arc::ptr_eq(registered, resource));
    }

    /// Remove and dispose every resource of `kind`, newest first.
    pub fn unregister_all_of_kind(&self, kind: ResourceKind) -> Vec<TelemetryError> {
        let mut inner = self.lock();
        let (matching, rest): (Vec<_>, Vec<_>) = inner
            .resources
            .drain(..)
            .partition(|resource| resource.kind() == kind);
        inner.resources = rest;
        dispose_in_reverse(matching)
    }

    pub fn count(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn count_of_kind(&self, kind: ResourceKind) -> usize {
        self.lock()
            .resources
            .iter()
            .filter(|resource| resource.kind() == kind)
            .count()
    }

    pub fn has_resources(&self) -> bool {
        !self.lock().resources.is_empty()
    }

    pub fn is_torn_down(&self) -> bool {
        self.lock().torn_down
    }

    /// Dispose every resource in reverse registration order.
    ///
    /// A failing resource does not stop the pass; its fault is logged and returned.
    /// Only the first call does any work.
    pub fn teardown(&self) -> Vec<TelemetryError> {
        let mut inner = self.lock();
        if inner.torn_down {
            return Vec::new();
        }
        let resources = std::mem::take(&mut inner.resources);
        let faults = dispose_in_reverse(resources);
        inner.torn_down = true;
        faults
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("LifecycleManager")
            .field("resources", &inner.resources.len())
            .field("torn_down", &inner.torn_down)
            .finish()
    }
}

fn dispose_in_reverse(resources: Vec<Arc<dyn ManagedResource>>) -> Vec<TelemetryError> {
    resources
        .into_iter()
        .rev()
        .fold(Vec::new(), |mut faults, resource| {
            if let Err(e) = resource.dispose() {
                let fault = TelemetryError::disposal(resource.label(), e);
                tracing::warn!(error = %fault, "resource disposal failed");
                faults.push(fault);
            }
            faults
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct Probe {
        name: &'static str,
        kind: ResourceKind,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ManagedResource for Probe {
        fn kind(&self) -> ResourceKind {
            self.kind
        }

        fn label(&self) -> String {
            self.name.to_owned()
        }

        fn dispose(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                anyhow::bail!("{} refused to close", self.name);
            }
            Ok(())
        }
    }

    fn probe(
        name: &'static str,
        kind: ResourceKind,
        fail: bool,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn ManagedResource> {
        Arc::new(Probe {
            name,
            kind,
            fail,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn teardown_disposes_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = LifecycleManager::new();
        for name in ["r1", "r2", "r3"] {
            manager
                .register(probe(name, ResourceKind::LogSink, false, &log))
                .unwrap();
        }

        let faults = manager.teardown();

        assert!(faults.is_empty());
        assert_eq!(*log.lock().unwrap(), ["r3", "r2", "r1"]);
        assert_eq!(manager.count(), 0);
        assert!(manager.is_torn_down());
    }

    #[test]
    fn failing_resource_does_not_stop_teardown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = LifecycleManager::new();
        manager.register(probe("r1", ResourceKind::LogSink, false, &log)).unwrap();
        manager.register(probe("r2", ResourceKind::LogSink, true, &log)).unwrap();
        manager.register(probe("r3", ResourceKind::LogSink, false, &log)).unwrap();

        let faults = manager.teardown();

        assert_eq!(*log.lock().unwrap(), ["r3", "r2", "r1"]);
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].kind(), ErrorKind::ResourceDisposal);
        assert!(faults[0].to_string().contains("r2"));
    }

    #[test]
    fn teardown_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = LifecycleManager::new();
        manager.register(probe("r1", ResourceKind::LogSink, false, &log)).unwrap();

        manager.teardown();
        assert!(manager.teardown().is_empty());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn late_registration_is_disposed_immediately() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = LifecycleManager::new();
        manager.teardown();

        manager.register(probe("r4", ResourceKind::LogSink, false, &log)).unwrap();

        assert_eq!(*log.lock().unwrap(), ["r4"]);
        assert_eq!(manager.count(), 0);
        assert!(!manager.has_resources());
    }

    #[test]
    fn late_registration_reports_disposal_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = LifecycleManager::new();
        manager.teardown();

        let err = manager
            .register(probe("r5", ResourceKind::LogSink, true, &log))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceDisposal);
    }

    #[test]
    fn unregister_releases_without_disposing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = LifecycleManager::new();
        let kept = probe("kept", ResourceKind::LogSink, false, &log);
        let moved = probe("moved", ResourceKind::LogSink, false, &log);
        manager.register(Arc::clone(&kept)).unwrap();
        manager.register(Arc::clone(&moved)).unwrap();

        manager.unregister(&moved);
        manager.unregister(&moved);

        assert_eq!(manager.count(), 1);
        assert!(log.lock().unwrap().is_empty());

        manager.teardown();
        assert_eq!(*log.lock().unwrap(), ["kept"]);
    }

    #[test]
    fn unregister_all_of_kind_disposes_matches_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = LifecycleManager::new();
        manager.register(probe("sink-a", ResourceKind::LogSink, false, &log)).unwrap();
        manager.register(probe("tracer", ResourceKind::TracerProvider, false, &log)).unwrap();
        manager.register(probe("sink-b", ResourceKind::LogSink, false, &log)).unwrap();

        assert_eq!(manager.count_of_kind(ResourceKind::LogSink), 2);
        let faults = manager.unregister_all_of_kind(ResourceKind::LogSink);

        assert!(faults.is_empty());
        assert_eq!(*log.lock().unwrap(), ["sink-b", "sink-a"]);
        assert_eq!(manager.count(), 1);
        assert_eq!(manager.count_of_kind(ResourceKind::TracerProvider), 1);
        assert_eq!(manager.count_of_kind(ResourceKind::LogSink), 0);
    }
}
