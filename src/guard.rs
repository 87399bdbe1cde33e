use std::sync::Arc;

use crate::error::TelemetryError;
use crate::lifecycle::LifecycleManager;

/// Lifecycle guard for everything the orchestrator built.
///
/// Dropping the guard tears down the [`LifecycleManager`]: providers are flushed and
/// shut down, handle registries are emptied, and file sinks are closed, newest first.
#[must_use = "dropping the TelemetryGuard immediately tears down every telemetry provider; \
              hold it for the lifetime of your application (e.g. `let _guard = ...;`)"]
pub struct TelemetryGuard {
    lifecycle: Arc<LifecycleManager>,
    shutdown_called: bool,
}

impl TelemetryGuard {
    pub(crate) fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            lifecycle,
            shutdown_called: false,
        }
    }

    /// Explicitly tear down every managed resource and return the disposal faults.
    ///
    /// Safe to call multiple times; subsequent calls are no-ops.
    /// This is also called automatically when the guard is dropped.
    pub fn shutdown(&mut self) -> Vec<TelemetryError> {
        if self.shutdown_called {
            return Vec::new();
        }
        self.shutdown_called = true;
        self.lifecycle.teardown()
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // The subscriber may already be gone, so faults go to stderr.
        for fault in self.shutdown() {
            eprintln!("raccoon-telemetry: {fault}");
        }
    }
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("lifecycle", &self.lifecycle)
            .field("shutdown_called", &self.shutdown_called)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::lifecycle::{ManagedResource, ResourceKind};

    struct Counted(Arc<AtomicUsize>);

    impl ManagedResource for Counted {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Custom("counted")
        }

        fn dispose(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn drop_tears_down_lifecycle_once() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let lifecycle = Arc::new(LifecycleManager::new());
        lifecycle
            .register(Arc::new(Counted(Arc::clone(&disposed))))
            .unwrap();

        let mut guard = TelemetryGuard::new(Arc::clone(&lifecycle));
        assert!(guard.shutdown().is_empty());
        drop(guard);

        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(lifecycle.is_torn_down());
    }
}
