//! Daemon context and lifecycle
//!
//! [`Provisioner`] owns every long-lived component and is passed explicitly;
//! there is no global state. `run` bootstraps the radio, starts the
//! supervisors and blocks until cancelled, then shuts everything down.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wp_core::config::{ProvisionerConfig, TunnelConfig};
use wp_core::error::ConfigError;
use wp_core::traits::{NetworkProbe, PrimaryProvider, RadioDriver, RadioEvent, SecondaryProvider};

use crate::connection::ConnectionOrchestrator;
use crate::recovery::RecoverySupervisor;
use crate::session::run_session_cleanup;
use crate::store::StateStore;
use crate::tunnel::{CommandProvider, SystemdPrimary, TunnelSupervisor};

/// Best-effort cleanup run once on shutdown, such as tearing down traffic
/// redirection installed by the web layer
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

type Providers = (
    Option<Arc<dyn PrimaryProvider>>,
    Option<Arc<dyn SecondaryProvider>>,
);

/// Build the configured tunnel providers
pub fn tunnel_providers(config: &TunnelConfig) -> Result<Providers, ConfigError> {
    let primary = config
        .primary
        .as_ref()
        .map(|p| Arc::new(SystemdPrimary::from_config(p)) as Arc<dyn PrimaryProvider>);
    let secondary = match &config.secondary {
        Some(s) => Some(Arc::new(CommandProvider::from_config(s)?) as Arc<dyn SecondaryProvider>),
        None => None,
    };
    Ok((primary, secondary))
}

pub struct Provisioner {
    config: ProvisionerConfig,
    driver: Arc<dyn RadioDriver>,
    store: Arc<StateStore>,
    orchestrator: Arc<ConnectionOrchestrator>,
    recovery: Arc<RecoverySupervisor>,
    primary: Option<Arc<dyn PrimaryProvider>>,
    secondary: Option<Arc<dyn SecondaryProvider>>,
    hooks: Vec<Arc<dyn ShutdownHook>>,
}

impl Provisioner {
    pub fn new(
        config: ProvisionerConfig,
        driver: Arc<dyn RadioDriver>,
        store: Arc<StateStore>,
        probe: Arc<dyn NetworkProbe>,
        (primary, secondary): Providers,
    ) -> Self {
        let orchestrator = Arc::new(ConnectionOrchestrator::new(
            Arc::clone(&driver),
            Arc::clone(&store),
            probe,
            &config,
        ));
        let recovery = Arc::new(RecoverySupervisor::new(
            Arc::clone(&orchestrator),
            config.recovery.clone(),
        ));

        Self {
            config,
            driver,
            store,
            orchestrator,
            recovery,
            primary,
            secondary,
            hooks: Vec::new(),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<ConnectionOrchestrator> {
        &self.orchestrator
    }

    pub fn add_shutdown_hook(&mut self, hook: Arc<dyn ShutdownHook>) {
        self.hooks.push(hook);
    }

    /// Bootstrap, supervise until `cancel` fires, then shut down
    pub async fn run(&self, cancel: CancellationToken) {
        match self.driver.detect_device().await {
            Ok(device) => tracing::info!("Using wireless device {}", device),
            Err(e) => tracing::warn!("Wireless device not detected: {}", e),
        }

        let state = self.orchestrator.bootstrap().await;
        tracing::info!("Bootstrap complete: {}", state.connection_state);

        let events = match self.driver.event_stream().await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to subscribe to radio events, recovery disabled: {}", e);
                // Closed stream; the supervisor still runs portal re-checks
                let (_, rx) = mpsc::channel::<RadioEvent>(1);
                rx
            }
        };

        let tunnel = TunnelSupervisor::new(
            Arc::clone(&self.store),
            self.primary.clone(),
            self.secondary.clone(),
            self.config.tunnel.clone(),
        );

        let tasks: Vec<JoinHandle<()>> = vec![
            tokio::spawn(Arc::clone(&self.recovery).run(events, cancel.child_token())),
            tokio::spawn(tunnel.run(cancel.child_token())),
            tokio::spawn(run_session_cleanup(
                Arc::clone(&self.store),
                self.config.sessions.clone(),
                cancel.child_token(),
            )),
        ];

        cancel.cancelled().await;
        self.shutdown(tasks).await;
    }

    async fn shutdown(&self, tasks: Vec<JoinHandle<()>>) {
        tracing::info!("Shutting down (timeout {:?})", self.config.shutdown_timeout);

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(self.config.shutdown_timeout, join_all(tasks))
            .await
            .is_err()
        {
            tracing::warn!("Background tasks did not stop in time, aborting");
            for handle in aborts {
                handle.abort();
            }
        }

        for hook in &self.hooks {
            match tokio::time::timeout(self.config.shutdown_timeout, hook.run()).await {
                Ok(Ok(())) => tracing::debug!("Shutdown hook {} done", hook.name()),
                Ok(Err(e)) => tracing::warn!("Shutdown hook {} failed: {:#}", hook.name(), e),
                Err(_) => tracing::warn!("Shutdown hook {} timed out", hook.name()),
            }
        }

        self.orchestrator.teardown_all().await;
        tracing::info!("Shutdown complete");
    }
}
