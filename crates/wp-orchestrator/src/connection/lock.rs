//! Shared connection lock
//!
//! Serializes radio-changing operations between user commands and the
//! recovery supervisor. Acquisition never waits: a held lock means someone
//! else is already switching, and the caller backs off.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct ConnectionLock {
    inner: Arc<Mutex<()>>,
}

/// Proof of holding the connection lock; released on drop
pub struct ConnectionPermit {
    _guard: OwnedMutexGuard<()>,
}

impl ConnectionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<ConnectionPermit> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| ConnectionPermit { _guard: guard })
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
