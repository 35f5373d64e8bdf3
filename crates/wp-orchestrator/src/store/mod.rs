//! Single source of truth for [`SystemState`]
//!
//! All mutation goes through [`StateStore::update`], which merges a
//! [`StatePatch`] under one mutex, persists the result and then notifies
//! listeners outside the lock.
//!
//! # Persistence health
//!
//! A failed write does not stop the daemon. Consecutive failures move the
//! health from `healthy` to `degraded` (1-3 failures) to `failed` (more than
//! 3); the next successful write restores `healthy`. While unhealthy, even a
//! patch that changes nothing retries the write so the store can recover.

mod listener;
mod patch;
mod persist;

pub use listener::{ListenerId, StateListener, StoreEvent};
pub use patch::StatePatch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use wp_core::time::current_time_millis;
use wp_core::{PersistenceHealth, SystemState};

use listener::{invoke, ListenerRegistry};

/// Capacity of the async event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Owns the system state
pub struct StateStore {
    state: Mutex<SystemState>,
    path: Option<PathBuf>,
    listeners: ListenerRegistry,
    events: broadcast::Sender<StoreEvent>,
}

impl StateStore {
    /// Open the store, loading the snapshot at `path` if it exists
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = persist::load(&path).await;
        Self::with_state(state, Some(path))
    }

    /// Store that never touches the disk
    pub fn in_memory() -> Self {
        Self::with_state(SystemState::default(), None)
    }

    fn with_state(state: SystemState, path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(state),
            path,
            listeners: ListenerRegistry::default(),
            events,
        }
    }

    /// Snapshot of the current state
    pub async fn get(&self) -> SystemState {
        self.state.lock().await.clone()
    }

    /// Path of the persisted snapshot, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn add_listener(&self, listener: Arc<dyn StateListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Subscribe to store events
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Merge `patch`, persist, and notify. Returns the resulting state.
    pub async fn update(&self, patch: StatePatch) -> SystemState {
        let (old, new, changed) = {
            let mut state = self.state.lock().await;
            let now = current_time_millis();

            let old = state.clone();
            let mut next = old.clone();
            patch.apply(&mut next, now);

            let changed = next != old;
            if !changed && old.persistence_health == PersistenceHealth::Healthy {
                return old;
            }
            if changed {
                next.updated_at = now;
            }

            self.persist(&mut next, now).await;
            *state = next.clone();
            (old, next, changed)
        };

        self.dispatch(&old, &new, changed);
        new
    }

    /// Create a companion-UI session and return its id
    pub async fn open_session(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.update(StatePatch::new().touch_session(id.clone())).await;
        id
    }

    async fn persist(&self, state: &mut SystemState, now: u64) {
        let Some(path) = &self.path else {
            return;
        };

        // Written as it will read once the write succeeds
        let mut snapshot = state.clone();
        snapshot.persistence_failures = 0;
        snapshot.persistence_health = PersistenceHealth::Healthy;

        match persist::save(path, &snapshot).await {
            Ok(()) => {
                if state.persistence_health != PersistenceHealth::Healthy {
                    tracing::info!("State persistence recovered");
                }
                state.persistence_failures = 0;
                state.persistence_health = PersistenceHealth::Healthy;
            }
            Err(e) => {
                state.persistence_failures += 1;
                state.persistence_last_failure = Some(now);
                state.persistence_health = PersistenceHealth::from_failures(state.persistence_failures);
                tracing::warn!(
                    "Failed to persist state to {:?} ({} consecutive, health {}): {}",
                    path,
                    state.persistence_failures,
                    state.persistence_health,
                    e
                );
            }
        }
    }

    fn dispatch(&self, old: &SystemState, new: &SystemState, changed: bool) {
        let listeners = self.listeners.snapshot();

        if changed {
            let _ = self.events.send(StoreEvent::Updated(Arc::new(new.clone())));
        }

        if old.connection_state != new.connection_state {
            tracing::info!(
                "Connection state {} -> {}",
                old.connection_state,
                new.connection_state
            );
            for l in &listeners {
                invoke("state_change", || {
                    l.on_state_change(old.connection_state, new.connection_state, new)
                });
            }
            let _ = self.events.send(StoreEvent::ConnectionStateChanged {
                old: old.connection_state,
                new: new.connection_state,
            });
        }

        if old.tunnel_url != new.tunnel_url {
            tracing::info!("Tunnel URL changed: {:?} -> {:?}", old.tunnel_url, new.tunnel_url);
            for l in &listeners {
                invoke("tunnel_url_change", || {
                    l.on_tunnel_url_change(old.tunnel_url.as_deref(), new.tunnel_url.as_deref())
                });
            }
            let _ = self.events.send(StoreEvent::TunnelUrlChanged {
                old: old.tunnel_url.clone(),
                new: new.tunnel_url.clone(),
            });
        }

        if old.persistence_health != new.persistence_health {
            for l in &listeners {
                invoke("persistence_health_change", || {
                    l.on_persistence_health_change(old.persistence_health, new.persistence_health)
                });
            }
            let _ = self.events.send(StoreEvent::PersistenceHealthChanged {
                old: old.persistence_health,
                new: new.persistence_health,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wp_core::{ConnectionState, NetworkInfo};

    #[derive(Default)]
    struct Counting {
        state: AtomicUsize,
        tunnel: AtomicUsize,
        health: Mutex<Vec<(PersistenceHealth, PersistenceHealth)>>,
    }

    impl StateListener for Counting {
        fn on_state_change(
            &self,
            _: ConnectionState,
            _: ConnectionState,
            _: &SystemState,
        ) -> anyhow::Result<()> {
            self.state.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_tunnel_url_change(&self, _: Option<&str>, _: Option<&str>) -> anyhow::Result<()> {
            self.tunnel.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_persistence_health_change(
            &self,
            old: PersistenceHealth,
            new: PersistenceHealth,
        ) -> anyhow::Result<()> {
            self.health.try_lock().unwrap().push((old, new));
            Ok(())
        }
    }

    struct Panicking;

    impl StateListener for Panicking {
        fn on_state_change(
            &self,
            _: ConnectionState,
            _: ConnectionState,
            _: &SystemState,
        ) -> anyhow::Result<()> {
            panic!("listener bug");
        }
    }

    #[tokio::test]
    async fn test_noop_update_does_not_dispatch() {
        let store = StateStore::in_memory();
        let counting = Arc::new(Counting::default());
        store.add_listener(counting.clone());

        let first = store
            .update(StatePatch::new().state(ConnectionState::Connecting))
            .await;
        let second = store
            .update(StatePatch::new().state(ConnectionState::Connecting))
            .await;

        assert_eq!(counting.state.load(Ordering::SeqCst), 1);
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn test_panicking_listener_is_isolated() {
        let store = StateStore::in_memory();
        let counting = Arc::new(Counting::default());
        store.add_listener(Arc::new(Panicking));
        store.add_listener(counting.clone());

        let state = store
            .update(StatePatch::new().state(ConnectionState::Connected))
            .await;

        assert!(state.is_connected());
        assert_eq!(counting.state.load(Ordering::SeqCst), 1);
        assert!(store.get().await.is_connected());
    }

    #[tokio::test]
    async fn test_tunnel_url_change_dispatched_once() {
        let store = StateStore::in_memory();
        let counting = Arc::new(Counting::default());
        store.add_listener(counting.clone());

        store
            .update(StatePatch::new().state(ConnectionState::Connected))
            .await;
        let patch = StatePatch::new().tunnel("https://abc.lhr.life", "localhost.run");
        store.update(patch.clone()).await;
        store.update(patch).await;
        assert_eq!(counting.tunnel.load(Ordering::SeqCst), 1);

        // Leaving CONNECTED clears the URL and notifies again
        store
            .update(StatePatch::new().state(ConnectionState::ApMode))
            .await;
        assert_eq!(counting.tunnel.load(Ordering::SeqCst), 2);
        assert!(store.get().await.tunnel_url.is_none());
    }

    #[tokio::test]
    async fn test_removed_listener_is_not_called() {
        let store = StateStore::in_memory();
        let counting = Arc::new(Counting::default());
        let id = store.add_listener(counting.clone());
        assert!(store.remove_listener(id));

        store
            .update(StatePatch::new().state(ConnectionState::Connected))
            .await;
        assert_eq!(counting.state.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = StateStore::open(&path).await;
            store
                .update(
                    StatePatch::new()
                        .state(ConnectionState::Connected)
                        .network(NetworkInfo::for_ssid("Home Wifi"))
                        .tunnel("https://abc.lhr.life", "localhost.run"),
                )
                .await;
        }

        let reopened = StateStore::open(&path).await;
        let state = reopened.get().await;
        assert!(state.is_connected());
        assert_eq!(state.network_info.ssid.as_deref(), Some("Home Wifi"));
        assert!(state.tunnel_url.is_none());
        assert!(state.tunnel_provider.is_none());
    }

    #[tokio::test]
    async fn test_persistence_health_degrades_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be makes every write fail
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let path = blocker.join("state.json");

        let store = StateStore::open(&path).await;
        let counting = Arc::new(Counting::default());
        store.add_listener(counting.clone());

        let state = store
            .update(StatePatch::new().state(ConnectionState::Switching))
            .await;
        assert_eq!(state.persistence_health, PersistenceHealth::Degraded);
        assert_eq!(state.persistence_failures, 1);
        assert!(state.persistence_last_failure.is_some());

        for s in [
            ConnectionState::Connecting,
            ConnectionState::Failed,
            ConnectionState::ApMode,
        ] {
            store.update(StatePatch::new().state(s)).await;
        }
        let state = store.get().await;
        assert_eq!(state.persistence_failures, 4);
        assert_eq!(state.persistence_health, PersistenceHealth::Failed);
        // The daemon keeps running in memory
        assert_eq!(state.connection_state, ConnectionState::ApMode);

        // Unblock the path; a no-op update retries and recovers
        std::fs::remove_file(&blocker).unwrap();
        let state = store
            .update(StatePatch::new().state(ConnectionState::ApMode))
            .await;
        assert_eq!(state.persistence_health, PersistenceHealth::Healthy);
        assert_eq!(state.persistence_failures, 0);
        assert!(path.exists());

        // The file carries the health of the write that produced it
        let on_disk: SystemState = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.persistence_health, PersistenceHealth::Healthy);
        assert_eq!(on_disk.persistence_failures, 0);
        assert_eq!(on_disk.persistence_last_failure, state.persistence_last_failure);

        let transitions = counting.health.try_lock().unwrap().clone();
        assert_eq!(
            transitions,
            vec![
                (PersistenceHealth::Healthy, PersistenceHealth::Degraded),
                (PersistenceHealth::Degraded, PersistenceHealth::Failed),
                (PersistenceHealth::Failed, PersistenceHealth::Healthy),
            ]
        );
    }

    #[tokio::test]
    async fn test_events_broadcast() {
        let store = StateStore::in_memory();
        let mut rx = store.subscribe();

        store
            .update(StatePatch::new().state(ConnectionState::Connected))
            .await;
        match rx.recv().await.unwrap() {
            StoreEvent::Updated(state) => assert!(state.is_connected()),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            StoreEvent::ConnectionStateChanged { old, new } => {
                assert_eq!(old, ConnectionState::Disconnected);
                assert_eq!(new, ConnectionState::Connected);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_session() {
        let store = StateStore::in_memory();
        let id = store.open_session().await;
        assert!(store.get().await.sessions.contains_key(&id));
    }
}
