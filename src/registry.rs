use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use opentelemetry::global::BoxedTracer;
use opentelemetry::metrics::Meter;
use opentelemetry::InstrumentationScope;

use crate::config::DEFAULT_SERVICE_VERSION;
use crate::error::{Result, TelemetryError};
use crate::lifecycle::{ManagedResource, ResourceKind};

/// A tracer-source handle.
pub type TracerSource = Handle<BoxedTracer>;
/// An instrument-factory handle.
pub type InstrumentFactory = Handle<Meter>;
/// Registry of tracer sources.
pub type TracerRegistry = HandleRegistry<BoxedTracer>;
/// Registry of instrument factories.
pub type MeterRegistry = HandleRegistry<Meter>;

type Factory<T> = dyn Fn(&str, &str) -> T + Send + Sync;

/// A long-lived, named telemetry object owned by a [`HandleRegistry`].
pub struct Handle<T> {
    name: String,
    version: String,
    inner: T,
    disposed: AtomicBool,
}

impl<T> Handle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `name:version`, the registry key.
    pub fn key(&self) -> String {
        registry_key(&self.name, &self.version)
    }

    pub fn get(&self) -> &T {
        &self.inner
    }

    /// Whether the owning registry has released this handle.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct State<T> {
    enabled: bool,
    handles: HashMap<String, Arc<Handle<T>>>,
}

/// Thread-safe get-or-create cache of telemetry handles keyed by `name:version`.
///
/// Lookups take the read lock; construction, disposal and the enable switch take the
/// write lock, so at most one handle is ever built per key.
pub struct HandleRegistry<T> {
    kind: ResourceKind,
    factory: Box<Factory<T>>,
    state: RwLock<State<T>>,
}

impl HandleRegistry<BoxedTracer> {
    /// Tracer sources built from the global tracer provider.
    pub fn tracers() -> Self {
        Self::with_factory(ResourceKind::TracerSource, |name, version| {
            opentelemetry::global::tracer_with_scope(scope(name, version))
        })
    }
}

impl HandleRegistry<Meter> {
    /// Instrument factories built from the global meter provider.
    pub fn meters() -> Self {
        Self::with_factory(ResourceKind::InstrumentFactory, |name, version| {
            opentelemetry::global::meter_with_scope(scope(name, version))
        })
    }
}

fn scope(name: &str, version: &str) -> InstrumentationScope {
    InstrumentationScope::builder(name.to_owned())
        .with_version(version.to_owned())
        .build()
}

impl<T: Send + Sync + 'static> HandleRegistry<T> {
    /// Registry whose handles are built by `factory(name, version)`.
    pub fn with_factory(
        kind: ResourceKind,
        factory: impl Fn(&str, &str) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            factory: Box::new(factory),
            state: RwLock::new(State {
                enabled: true,
                handles: HashMap::new(),
            }),
        }
    }

    /// Return the handle for `name:version`, building it on first use.
    ///
    /// `version` defaults to `1.0.0`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `name` is empty or whitespace
    /// - `IllegalState` if the registry is disabled
    pub fn get_or_create(&self, name: &str, version: Option<&str>) -> Result<Arc<Handle<T>>> {
        if name.trim().is_empty() {
            return Err(TelemetryError::invalid_argument(
                "name",
                name,
                "handle name must not be empty",
            ));
        }
        let version = version.unwrap_or(DEFAULT_SERVICE_VERSION);
        let key = registry_key(name, version);

        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = state.handles.get(&key) {
                return Ok(Arc::clone(handle));
            }
            if !state.enabled {
                return Err(self.disabled_error(&key));
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.enabled {
            return Err(self.disabled_error(&key));
        }
        if let Some(handle) = state.handles.get(&key) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(Handle {
            name: name.to_owned(),
            version: version.to_owned(),
            inner: (self.factory)(name, version),
            disposed: AtomicBool::new(false),
        });
        state.handles.insert(key, Arc::clone(&handle));
        tracing::debug!(kind = %self.kind, name, version, "created telemetry handle");

        Ok(handle)
    }

    /// Flip the global switch. Disabling disposes every cached handle.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.enabled = enabled;
        if !enabled {
            Self::dispose_locked(&mut state);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled
    }

    /// Dispose and forget every cached handle. Safe to call repeatedly.
    pub fn dispose_all(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Self::dispose_locked(&mut state);
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handles
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str, version: Option<&str>) -> bool {
        let key = registry_key(name, version.unwrap_or(DEFAULT_SERVICE_VERSION));
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handles
            .contains_key(&key)
    }

    fn dispose_locked(state: &mut State<T>) {
        for (_, handle) in state.handles.drain() {
            handle.dispose();
        }
    }

    fn disabled_error(&self, key: &str) -> TelemetryError {
        TelemetryError::IllegalState(format!(
            "{} registry is disabled; refusing to create `{key}`",
            self.kind
        ))
    }
}

impl<T> fmt::Debug for HandleRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> ManagedResource for HandleRegistry<T> {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn label(&self) -> String {
        format!("{} registry", self.kind)
    }

    fn dispose(&self) -> anyhow::Result<()> {
        self.dispose_all();
        Ok(())
    }
}

fn registry_key(name: &str, version: &str) -> String {
    format!("{name}:{version}")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    use super::*;
    use crate::error::ErrorKind;

    fn counting_registry() -> (HandleRegistry<usize>, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let registry = HandleRegistry::with_factory(ResourceKind::TracerSource, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst)
        });
        (registry, built)
    }

    #[test]
    fn same_key_returns_same_instance() {
        let (registry, built) = counting_registry();

        let first = registry.get_or_create("orders", Some("2.1.0")).unwrap();
        let second = registry.get_or_create("orders", Some("2.1.0")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(first.key(), "orders:2.1.0");
    }

    #[test]
    fn version_defaults_to_1_0_0() {
        let (registry, _) = counting_registry();

        let implicit = registry.get_or_create("orders", None).unwrap();
        let explicit = registry.get_or_create("orders", Some("1.0.0")).unwrap();

        assert!(Arc::ptr_eq(&implicit, &explicit));
        assert_eq!(implicit.version(), "1.0.0");
    }

    #[test]
    fn distinct_names_and_versions_get_distinct_handles() {
        let (registry, _) = counting_registry();

        let a = registry.get_or_create("A", None).unwrap();
        let b = registry.get_or_create("B", None).unwrap();
        let a1 = registry.get_or_create("A", Some("1")).unwrap();
        let a2 = registry.get_or_create("A", Some("2")).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a1, &a2));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn blank_name_is_invalid_argument() {
        let (registry, built) = counting_registry();

        for name in ["", "   "] {
            let err = registry.get_or_create(name, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_callers_converge_on_one_instance() {
        const CALLERS: usize = 16;
        let (registry, built) = counting_registry();
        let barrier = Barrier::new(CALLERS);

        let handles: Vec<_> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..CALLERS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry.get_or_create("shared", None).unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[test]
    fn dispose_all_then_recreate_yields_new_instance() {
        let (registry, built) = counting_registry();

        let before = registry.get_or_create("orders", None).unwrap();
        registry.dispose_all();
        assert!(before.is_disposed());
        assert!(registry.is_empty());

        let after = registry.get_or_create("orders", None).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(!after.is_disposed());
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dispose_all_is_idempotent() {
        let (registry, _) = counting_registry();
        registry.dispose_all();
        registry.dispose_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn disabling_flushes_and_blocks_creation() {
        let (registry, _) = counting_registry();
        let cached = registry.get_or_create("orders", None).unwrap();

        registry.set_enabled(false);
        assert!(!registry.is_enabled());
        assert!(cached.is_disposed());
        assert!(!registry.contains("orders", None));

        let err = registry.get_or_create("orders", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);

        registry.set_enabled(true);
        assert!(registry.is_enabled());
        assert!(registry.get_or_create("orders", None).is_ok());
    }

    #[test]
    fn enabling_an_enabled_registry_keeps_cached_handles() {
        let (registry, built) = counting_registry();
        let before = registry.get_or_create("orders", None).unwrap();

        registry.set_enabled(true);

        let after = registry.get_or_create("orders", None).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(!before.is_disposed());
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn global_backed_registries_hand_out_scoped_handles() {
        let tracers = TracerRegistry::tracers();
        let meters = MeterRegistry::meters();

        let tracer = tracers.get_or_create("checkout", Some("3.0.0")).unwrap();
        let meter = meters.get_or_create("checkout", Some("3.0.0")).unwrap();

        assert_eq!(tracer.name(), "checkout");
        assert_eq!(meter.version(), "3.0.0");
        assert_eq!(ManagedResource::kind(&meters), ResourceKind::InstrumentFactory);
    }
}
