//! Explicit component lifecycle: register disposers against a handle, run
//! them with `dispose(handle)` at teardown.
//!
//! Components that cache per-owner state (a chat session, a dashboard
//! widget) register a disposer that invalidates it; the owner disposes the
//! handle when the component goes away.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::debug;

/// Opaque identifier for a registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentHandle(u64);

impl ComponentHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

type Disposer = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    disposers: BTreeMap<ComponentHandle, Vec<Disposer>>,
}

/// Handle → disposers map. Disposers run exactly once, in registration
/// order, outside the registry lock.
#[derive(Default)]
pub struct DisposerRegistry {
    inner: Mutex<Registry>,
}

impl DisposerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().expect("disposer registry lock poisoned")
    }

    /// Allocate a fresh handle with no disposers.
    pub fn new_handle(&self) -> ComponentHandle {
        let mut registry = self.lock();
        registry.next_id += 1;
        let handle = ComponentHandle(registry.next_id);
        registry.disposers.insert(handle, Vec::new());
        handle
    }

    /// Attach `disposer` to `handle`.
    ///
    /// Returns `false` (and drops the disposer unrun) if the handle was
    /// never allocated or is already disposed.
    pub fn register<F>(&self, handle: ComponentHandle, disposer: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.lock().disposers.get_mut(&handle) {
            Some(list) => {
                list.push(Box::new(disposer));
                true
            }
            None => false,
        }
    }

    /// Run and forget every disposer of `handle`. Returns how many ran;
    /// disposing twice runs nothing the second time.
    pub fn dispose(&self, handle: ComponentHandle) -> usize {
        let disposers = self.lock().disposers.remove(&handle).unwrap_or_default();
        let count = disposers.len();
        for disposer in disposers {
            disposer();
        }
        debug!(handle = handle.0, count, "Disposed component");
        count
    }

    /// Dispose every live handle, oldest first. Returns disposers run.
    pub fn dispose_all(&self) -> usize {
        let all = std::mem::take(&mut self.lock().disposers);
        let mut count = 0;
        for (_, disposers) in all {
            for disposer in disposers {
                disposer();
                count += 1;
            }
        }
        count
    }

    /// Handles allocated and not yet disposed.
    pub fn live_handles(&self) -> Vec<ComponentHandle> {
        self.lock().disposers.keys().copied().collect()
    }
}

impl std::fmt::Debug for DisposerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposerRegistry")
            .field("live", &self.lock().disposers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce() + Send>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |name: &'static str| {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().unwrap().push(name)) as Box<dyn FnOnce() + Send>
        };
        (log, make)
    }

    #[test]
    fn test_dispose_runs_in_registration_order_once() {
        let registry = DisposerRegistry::new();
        let (log, make) = recorder();
        let handle = registry.new_handle();
        assert!(registry.register(handle, make("first")));
        assert!(registry.register(handle, make("second")));

        assert_eq!(registry.dispose(handle), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(registry.dispose(handle), 0);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_register_on_disposed_handle_is_rejected() {
        let registry = DisposerRegistry::new();
        let (log, make) = recorder();
        let handle = registry.new_handle();
        registry.dispose(handle);
        assert!(!registry.register(handle, make("late")));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispose_is_scoped_to_handle() {
        let registry = DisposerRegistry::new();
        let (log, make) = recorder();
        let a = registry.new_handle();
        let b = registry.new_handle();
        registry.register(a, make("a"));
        registry.register(b, make("b"));

        registry.dispose(a);
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        assert_eq!(registry.live_handles(), vec![b]);
    }

    #[test]
    fn test_dispose_all() {
        let registry = DisposerRegistry::new();
        let (log, make) = recorder();
        let a = registry.new_handle();
        let b = registry.new_handle();
        registry.register(b, make("b"));
        registry.register(a, make("a"));
        assert_eq!(registry.dispose_all(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert!(registry.live_handles().is_empty());
    }

    #[test]
    fn test_disposer_can_reenter_registry() {
        let registry = Arc::new(DisposerRegistry::new());
        let handle = registry.new_handle();
        let inner = Arc::clone(&registry);
        registry.register(handle, move || {
            let _ = inner.live_handles();
        });
        assert_eq!(registry.dispose(handle), 1);
    }
}
