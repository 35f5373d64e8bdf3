//! State change notification
//!
//! Listeners are called synchronously, one after another, after the state
//! lock has been released. A listener that returns an error or panics is
//! logged and skipped; it never aborts the update or the listeners after it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use wp_core::{ConnectionState, PersistenceHealth, SystemState};

/// Receives store notifications. All methods default to doing nothing.
pub trait StateListener: Send + Sync {
    /// Called when `connection_state` changes. `state` is the new snapshot.
    fn on_state_change(
        &self,
        _old: ConnectionState,
        _new: ConnectionState,
        _state: &SystemState,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_tunnel_url_change(&self, _old: Option<&str>, _new: Option<&str>) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_persistence_health_change(
        &self,
        _old: PersistenceHealth,
        _new: PersistenceHealth,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handle returned by registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event broadcast to async subscribers
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// Any field changed
    Updated(Arc<SystemState>),
    ConnectionStateChanged {
        old: ConnectionState,
        new: ConnectionState,
    },
    TunnelUrlChanged {
        old: Option<String>,
        new: Option<String>,
    },
    PersistenceHealthChanged {
        old: PersistenceHealth,
        new: PersistenceHealth,
    },
}

/// Registered listeners, guarded by their own lock
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<dyn StateListener>)>,
}

impl ListenerRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn add(&self, listener: Arc<dyn StateListener>) -> ListenerId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(lid, _)| *lid != id);
        inner.listeners.len() != before
    }

    /// Copy of the current listeners, so callbacks may (un)register freely
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn StateListener>> {
        self.lock().listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// Run one listener callback, containing errors and panics
pub(crate) fn invoke<F>(what: &str, f: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("State listener failed in {}: {:#}", what, e),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("State listener panicked in {}: {}", what, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;
    impl StateListener for Nop {}

    #[test]
    fn test_register_and_remove() {
        let registry = ListenerRegistry::default();
        let a = registry.add(Arc::new(Nop));
        let b = registry.add(Arc::new(Nop));
        assert_ne!(a, b);
        assert_eq!(registry.snapshot().len(), 2);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_invoke_contains_panics() {
        invoke("test", || panic!("boom"));
        invoke("test", || Err(anyhow::anyhow!("listener error")));
    }
}
