//! Reverse tunnel supervision
//!
//! Tunnels only run while the device is CONNECTED. The primary provider is
//! preferred; while it is down the secondary runs as a child process and the
//! primary is re-checked periodically. Secondary spawn failures are retried
//! with backoff up to `max_attempts`, after which the tunnel fields are
//! cleared and the supervisor waits for the next connection.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use wp_core::config::TunnelConfig;
use wp_core::traits::{PrimaryProvider, SecondaryProvider};
use wp_core::ConnectionState;

use super::process::ManagedChild;
use crate::recovery::ExponentialBackoff;
use crate::store::{StatePatch, StateStore, StoreEvent};

/// Why a secondary tunnel run failed
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Failed to spawn {provider}: {source}")]
    Spawn {
        provider: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{provider} printed no URL within {secs}s")]
    NoUrl { provider: String, secs: u64 },

    #[error("{provider} exited unexpectedly ({status})")]
    Exited { provider: String, status: String },
}

/// Why a serving phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Cancelled,
    /// The device left CONNECTED
    Disconnected,
    /// The primary came back while the secondary was running
    PrimaryRecovered,
    /// Attempts exhausted or nothing configured
    GaveUp,
}

/// What happened to one secondary child
enum ChildEnd {
    Exit(Exit),
    Refresh,
    Failed(TunnelError),
}

pub struct TunnelSupervisor {
    store: Arc<StateStore>,
    primary: Option<Arc<dyn PrimaryProvider>>,
    secondary: Option<Arc<dyn SecondaryProvider>>,
    config: TunnelConfig,
}

impl TunnelSupervisor {
    pub fn new(
        store: Arc<StateStore>,
        primary: Option<Arc<dyn PrimaryProvider>>,
        secondary: Option<Arc<dyn SecondaryProvider>>,
        config: TunnelConfig,
    ) -> Self {
        Self {
            store,
            primary,
            secondary,
            config,
        }
    }

    /// Supervise tunnels until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        if !self.config.enabled || (self.primary.is_none() && self.secondary.is_none()) {
            tracing::info!("Tunnel supervisor disabled");
            return;
        }

        let mut events = self.store.subscribe();
        tracing::info!(
            "Starting tunnel supervisor (primary: {}, secondary: {})",
            self.primary.as_ref().map_or("none", |p| p.name()),
            self.secondary.as_ref().map_or("none", |s| s.name())
        );

        loop {
            if !self.store.get().await.is_connected() && !self.wait_for_connected(&mut events, &cancel).await {
                break;
            }

            match self.serve(&mut events, &cancel).await {
                Exit::Cancelled => break,
                Exit::Disconnected | Exit::PrimaryRecovered => continue,
                Exit::GaveUp => {
                    self.store.update(StatePatch::new().clear_tunnel()).await;
                    match self.wait_after_give_up(&mut events, &cancel).await {
                        Exit::Cancelled => break,
                        _ => continue,
                    }
                }
            }
        }

        tracing::info!("Tunnel supervisor shutting down");
    }

    /// Block until the device is CONNECTED. Returns `false` when cancelled.
    async fn wait_for_connected(
        &self,
        events: &mut broadcast::Receiver<StoreEvent>,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                event = events.recv() => match event {
                    Ok(StoreEvent::ConnectionStateChanged { new: ConnectionState::Connected, .. }) => return true,
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {
                        if self.store.get().await.is_connected() {
                            return true;
                        }
                    }
                    Err(RecvError::Closed) => return false,
                },
            }
        }
    }

    /// Whether `event` means the device is no longer CONNECTED
    async fn left_connected(&self, event: Result<StoreEvent, RecvError>) -> bool {
        match event {
            Ok(StoreEvent::ConnectionStateChanged { new, .. }) => new != ConnectionState::Connected,
            Ok(_) => false,
            Err(RecvError::Lagged(_)) => !self.store.get().await.is_connected(),
            Err(RecvError::Closed) => true,
        }
    }

    async fn serve(&self, events: &mut broadcast::Receiver<StoreEvent>, cancel: &CancellationToken) -> Exit {
        loop {
            if let Some(primary) = &self.primary {
                if primary.is_active().await {
                    match self.serve_primary(primary.as_ref(), events, cancel).await {
                        Exit::GaveUp => {}
                        other => return other,
                    }
                } else {
                    tracing::info!("Primary tunnel {} inactive", primary.name());
                }
            }

            match &self.secondary {
                Some(secondary) => match self.serve_secondary(secondary.as_ref(), events, cancel).await {
                    Exit::PrimaryRecovered => continue,
                    other => return other,
                },
                None => return Exit::GaveUp,
            }
        }
    }

    /// Publish the primary URL and watch its health. Returns `GaveUp` when
    /// the primary goes down.
    async fn serve_primary(
        &self,
        primary: &dyn PrimaryProvider,
        events: &mut broadcast::Receiver<StoreEvent>,
        cancel: &CancellationToken,
    ) -> Exit {
        tracing::info!("Using primary tunnel {}", primary.name());
        self.publish(primary.public_url(), primary.name()).await;

        let period = self.config.primary_check_interval;
        let mut check = tokio::time::interval_at(Instant::now() + period, period);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Exit::Cancelled,
                event = events.recv() => {
                    if self.left_connected(event).await {
                        return Exit::Disconnected;
                    }
                }
                _ = check.tick() => {
                    if !primary.is_active().await {
                        tracing::warn!("Primary tunnel {} went down, falling back", primary.name());
                        self.store.update(StatePatch::new().clear_tunnel()).await;
                        return Exit::GaveUp;
                    }
                }
            }
        }
    }

    /// Run the secondary provider with bounded respawn attempts
    async fn serve_secondary(
        &self,
        secondary: &dyn SecondaryProvider,
        events: &mut broadcast::Receiver<StoreEvent>,
        cancel: &CancellationToken,
    ) -> Exit {
        let mut backoff =
            ExponentialBackoff::new(self.config.retry_delay, self.config.max_retry_delay, 2.0, 0.0);
        let mut failures = 0u32;

        loop {
            let end = match ManagedChild::spawn(
                secondary.name(),
                secondary.command(self.config.local_port, self.auth()),
            ) {
                Ok(child) => {
                    tracing::info!("Started secondary tunnel {} (pid {:?})", secondary.name(), child.id());
                    self.watch_child(secondary, child, &mut failures, &mut backoff, events, cancel)
                        .await
                }
                Err(source) => ChildEnd::Failed(TunnelError::Spawn {
                    provider: secondary.name().to_string(),
                    source,
                }),
            };

            match end {
                ChildEnd::Exit(exit) => return exit,
                ChildEnd::Refresh => continue,
                ChildEnd::Failed(err) => {
                    failures += 1;
                    self.store.update(StatePatch::new().clear_tunnel()).await;
                    if failures >= self.config.max_attempts {
                        tracing::error!(
                            "Giving up on secondary tunnel after {} attempts: {}",
                            failures,
                            err
                        );
                        return Exit::GaveUp;
                    }

                    let delay = backoff.next_delay();
                    tracing::warn!(
                        "Secondary tunnel failed ({}/{}): {}; retrying in {:?}",
                        failures,
                        self.config.max_attempts,
                        err,
                        delay
                    );
                    let sleep = tokio::time::sleep(delay);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return Exit::Cancelled,
                            event = events.recv() => {
                                if self.left_connected(event).await {
                                    return Exit::Disconnected;
                                }
                            }
                            _ = &mut sleep => break,
                        }
                    }
                }
            }
        }
    }

    fn auth(&self) -> Option<&str> {
        self.config.secondary.as_ref().and_then(|s| s.auth.as_deref())
    }

    async fn watch_child(
        &self,
        secondary: &dyn SecondaryProvider,
        mut child: ManagedChild,
        failures: &mut u32,
        backoff: &mut ExponentialBackoff,
        events: &mut broadcast::Receiver<StoreEvent>,
        cancel: &CancellationToken,
    ) -> ChildEnd {
        let stop_timeout = self.config.stop_timeout;
        let url_deadline = tokio::time::sleep(self.config.url_timeout);
        tokio::pin!(url_deadline);
        let refresh_every = secondary.refresh_interval();
        let refresh = tokio::time::sleep(refresh_every.unwrap_or(Duration::ZERO));
        tokio::pin!(refresh);

        let period = self.config.primary_check_interval;
        let mut primary_check = tokio::time::interval_at(Instant::now() + period, period);
        primary_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut published = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    child.stop(stop_timeout).await;
                    return ChildEnd::Exit(Exit::Cancelled);
                }
                event = events.recv() => {
                    if self.left_connected(event).await {
                        tracing::info!("Connection lost, stopping secondary tunnel");
                        child.stop(stop_timeout).await;
                        return ChildEnd::Exit(Exit::Disconnected);
                    }
                }
                line = child.next_line() => match line {
                    Some(line) => {
                        tracing::trace!("{}: {}", secondary.name(), line);
                        if let Some(url) = secondary.match_url(&line) {
                            if !published {
                                *failures = 0;
                                backoff.reset();
                                published = true;
                            }
                            self.publish(url, secondary.name()).await;
                        }
                    }
                    None => {
                        let status = match tokio::time::timeout(stop_timeout, child.wait()).await {
                            Ok(Ok(status)) => status.to_string(),
                            Ok(Err(e)) => e.to_string(),
                            Err(_) => {
                                child.stop(stop_timeout).await;
                                "stdout closed".to_string()
                            }
                        };
                        return ChildEnd::Failed(TunnelError::Exited {
                            provider: secondary.name().to_string(),
                            status,
                        });
                    }
                },
                _ = &mut url_deadline, if !published => {
                    child.stop(stop_timeout).await;
                    return ChildEnd::Failed(TunnelError::NoUrl {
                        provider: secondary.name().to_string(),
                        secs: self.config.url_timeout.as_secs(),
                    });
                }
                _ = &mut refresh, if published && refresh_every.is_some() => {
                    tracing::info!("Refreshing secondary tunnel {}", secondary.name());
                    child.stop(stop_timeout).await;
                    return ChildEnd::Refresh;
                }
                _ = primary_check.tick(), if self.primary.is_some() => {
                    if let Some(primary) = &self.primary {
                        if primary.is_active().await {
                            tracing::info!("Primary tunnel {} recovered, stopping secondary", primary.name());
                            child.stop(stop_timeout).await;
                            return ChildEnd::Exit(Exit::PrimaryRecovered);
                        }
                    }
                }
            }
        }
    }

    /// Publish `url` unless it is already the current one
    async fn publish(&self, url: String, provider: &str) {
        let current = self.store.get().await;
        if current.tunnel_url.as_deref() == Some(url.as_str())
            && current.tunnel_provider.as_deref() == Some(provider)
        {
            return;
        }
        tracing::info!("Publishing tunnel URL {} via {}", url, provider);
        self.store.update(StatePatch::new().tunnel(url, provider)).await;
    }

    /// After giving up, wait for the device to leave CONNECTED or for the
    /// primary to come back
    async fn wait_after_give_up(
        &self,
        events: &mut broadcast::Receiver<StoreEvent>,
        cancel: &CancellationToken,
    ) -> Exit {
        let period = self.config.primary_check_interval;
        let mut check = tokio::time::interval_at(Instant::now() + period, period);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Exit::Cancelled,
                event = events.recv() => {
                    if self.left_connected(event).await {
                        return Exit::Disconnected;
                    }
                }
                _ = check.tick(), if self.primary.is_some() => {
                    if let Some(primary) = &self.primary {
                        if primary.is_active().await {
                            return Exit::PrimaryRecovered;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use wp_core::config::SecondaryTunnelConfig;

    use crate::tunnel::CommandProvider;

    struct SwitchPrimary {
        active: AtomicBool,
    }

    #[async_trait]
    impl PrimaryProvider for SwitchPrimary {
        fn name(&self) -> &str {
            "frp"
        }

        async fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn public_url(&self) -> String {
            "https://device.example.com".to_string()
        }
    }

    fn config() -> TunnelConfig {
        TunnelConfig {
            primary_check_interval: Duration::from_millis(50),
            retry_delay: Duration::from_millis(10),
            max_retry_delay: Duration::from_millis(40),
            url_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_millis(500),
            ..TunnelConfig::default()
        }
    }

    fn shell(script: &str) -> Arc<dyn SecondaryProvider> {
        shell_refreshing(script, SecondaryTunnelConfig::default().refresh_interval)
    }

    fn shell_refreshing(script: &str, refresh_interval: Duration) -> Arc<dyn SecondaryProvider> {
        let config = SecondaryTunnelConfig {
            name: "shell".to_string(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            refresh_interval,
            ..SecondaryTunnelConfig::default()
        };
        Arc::new(CommandProvider::from_config(&config).unwrap())
    }

    fn spawn_count(log: &std::path::Path) -> usize {
        std::fs::read_to_string(log).map_or(0, |s| s.lines().count())
    }

    /// Published URLs seen on `events`, in order
    fn published_urls(events: &mut broadcast::Receiver<StoreEvent>) -> Vec<String> {
        let mut urls = Vec::new();
        loop {
            match events.try_recv() {
                Ok(StoreEvent::TunnelUrlChanged { new: Some(url), .. }) => urls.push(url),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
        urls
    }

    async fn connected_store() -> Arc<StateStore> {
        let store = Arc::new(StateStore::in_memory());
        store
            .update(StatePatch::new().state(ConnectionState::Connected))
            .await;
        store
    }

    async fn wait_until<F>(store: &StateStore, mut check: F) -> bool
    where
        F: FnMut(&wp_core::SystemState) -> bool,
    {
        for _ in 0..200 {
            if check(&store.get().await) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_secondary_url_published_once() {
        let store = connected_store().await;
        let mut events = store.subscribe();
        let supervisor = TunnelSupervisor::new(
            Arc::clone(&store),
            None,
            Some(shell("echo https://abc123.lhr.life; echo https://abc123.lhr.life; sleep 30")),
            config(),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        assert!(wait_until(&store, |s| s.tunnel_url.is_some()).await);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let state = store.get().await;
        assert_eq!(state.tunnel_url.as_deref(), Some("https://abc123.lhr.life"));
        assert_eq!(state.tunnel_provider.as_deref(), Some("shell"));

        let mut url_changes = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, StoreEvent::TunnelUrlChanged { .. }) {
                url_changes += 1;
            }
        }
        assert_eq!(url_changes, 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_leaving_connected_clears_tunnel() {
        let store = connected_store().await;
        let supervisor = TunnelSupervisor::new(
            Arc::clone(&store),
            None,
            Some(shell("echo https://abc123.lhr.life; sleep 30")),
            config(),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        assert!(wait_until(&store, |s| s.tunnel_url.is_some()).await);
        store
            .update(StatePatch::new().state(ConnectionState::Disconnected))
            .await;
        assert!(store.get().await.tunnel_url.is_none());

        // Nothing is republished while disconnected
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get().await.tunnel_url.is_none());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_primary_preferred() {
        let store = connected_store().await;
        let primary = Arc::new(SwitchPrimary {
            active: AtomicBool::new(true),
        });
        let supervisor = TunnelSupervisor::new(
            Arc::clone(&store),
            Some(primary),
            Some(shell("echo https://abc123.lhr.life; sleep 30")),
            config(),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        assert!(wait_until(&store, |s| s.tunnel_url.is_some()).await);
        let state = store.get().await;
        assert_eq!(state.tunnel_url.as_deref(), Some("https://device.example.com"));
        assert_eq!(state.tunnel_provider.as_deref(), Some("frp"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_primary_recovery_replaces_secondary() {
        let store = connected_store().await;
        let primary = Arc::new(SwitchPrimary {
            active: AtomicBool::new(false),
        });
        let supervisor = TunnelSupervisor::new(
            Arc::clone(&store),
            Some(Arc::clone(&primary) as Arc<dyn PrimaryProvider>),
            Some(shell("echo https://abc123.lhr.life; sleep 30")),
            config(),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        assert!(wait_until(&store, |s| s.tunnel_provider.as_deref() == Some("shell")).await);

        primary.active.store(true, Ordering::SeqCst);
        assert!(wait_until(&store, |s| s.tunnel_provider.as_deref() == Some("frp")).await);

        primary.active.store(false, Ordering::SeqCst);
        assert!(wait_until(&store, |s| s.tunnel_provider.as_deref() == Some("shell")).await);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        let store = connected_store().await;
        let supervisor = TunnelSupervisor::new(
            Arc::clone(&store),
            None,
            Some(shell(&format!("echo spawn >> {}; exit 1", log.display()))),
            TunnelConfig {
                max_attempts: 3,
                ..config()
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(800)).await;
        let spawns = std::fs::read_to_string(&log).unwrap().lines().count();
        assert_eq!(spawns, 3);
        assert!(store.get().await.tunnel_url.is_none());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_secondary_respawned_on_refresh_interval() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        let store = connected_store().await;
        let mut events = store.subscribe();
        // Each run prints a different URL: https://tunnel1.lhr.life, tunnel2, ...
        let script = format!(
            "echo spawn >> {log}; echo https://tunnel$(wc -l < {log} | tr -d ' ').lhr.life; exec sleep 30",
            log = log.display()
        );
        let supervisor = TunnelSupervisor::new(
            Arc::clone(&store),
            None,
            Some(shell_refreshing(&script, Duration::from_millis(300))),
            TunnelConfig {
                max_attempts: 2,
                ..config()
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        for _ in 0..200 {
            if spawn_count(&log) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(spawn_count(&log) >= 3);
        let refreshed = |s: &wp_core::SystemState| {
            s.tunnel_url.is_some() && s.tunnel_url.as_deref() != Some("https://tunnel1.lhr.life")
        };
        assert!(wait_until(&store, refreshed).await);

        let urls = published_urls(&mut events);
        assert_eq!(urls.first().map(String::as_str), Some("https://tunnel1.lhr.life"));
        assert!(urls.iter().any(|u| u == "https://tunnel2.lhr.life"));
        assert_eq!(store.get().await.tunnel_provider.as_deref(), Some("shell"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_after_publish_restarts_with_fresh_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        let store = connected_store().await;
        let mut events = store.subscribe();
        let supervisor = TunnelSupervisor::new(
            Arc::clone(&store),
            None,
            Some(shell(&format!(
                "echo spawn >> {}; echo https://abc123.lhr.life; sleep 0.2; exit 1",
                log.display()
            ))),
            TunnelConfig {
                max_attempts: 2,
                ..config()
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        // A published URL resets the attempt count, so the child outlives max_attempts
        for _ in 0..200 {
            if spawn_count(&log) >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(spawn_count(&log) >= 4);
        assert!(wait_until(&store, |s| s.tunnel_url.is_some()).await);

        // Cleared on every exit, then republished by the next child
        let urls = published_urls(&mut events);
        assert!(urls.len() >= 2, "published {:?}", urls);
        assert!(urls.iter().all(|u| u == "https://abc123.lhr.life"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_url_within_timeout_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        let store = connected_store().await;
        let supervisor = TunnelSupervisor::new(
            Arc::clone(&store),
            None,
            Some(shell(&format!("echo spawn >> {}; exec sleep 30", log.display()))),
            TunnelConfig {
                max_attempts: 2,
                url_timeout: Duration::from_millis(100),
                ..config()
            },
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let spawns = std::fs::read_to_string(&log).unwrap().lines().count();
        assert_eq!(spawns, 2);
        assert!(store.get().await.tunnel_url.is_none());

        cancel.cancel();
        task.await.unwrap();
    }
}
