//! Automatic reconnection after connectivity loss
//!
//! Watches the radio event stream. A loss event while CONNECTED starts one
//! recovery task that retries the saved network with exponential backoff.
//! The connection lock is taken per attempt and released while sleeping, so a
//! user command can take over between attempts; when it does, recovery
//! stops. Loss events that arrive while the lock is held are dropped, never
//! queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use wp_core::config::RecoveryConfig;
use wp_core::traits::{PortalVerdict, RadioEvent};
use wp_core::{ConnectionState, FailureKind};

use super::backoff::ExponentialBackoff;
use crate::connection::ConnectionOrchestrator;
use crate::store::StatePatch;

/// How a recovery run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The saved network is back and verified
    Recovered { attempts: u32 },
    /// A user command took over the radio
    Preempted,
    /// The saved credentials are stale; retrying cannot help
    Failed(FailureKind),
    /// Every attempt failed; the device fell back to AP mode
    Exhausted { attempts: u32 },
    Cancelled,
}

/// Runs the reconnection loop
pub struct RecoverySupervisor {
    orchestrator: Arc<ConnectionOrchestrator>,
    config: RecoveryConfig,
    /// Set by `ConnectivityRestored`, cleared when a recovery starts
    restored: AtomicBool,
}

impl RecoverySupervisor {
    pub fn new(orchestrator: Arc<ConnectionOrchestrator>, config: RecoveryConfig) -> Self {
        Self {
            orchestrator,
            config,
            restored: AtomicBool::new(false),
        }
    }

    /// Consume radio events until cancelled
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<RadioEvent>, cancel: CancellationToken) {
        let period = self.config.portal_recheck_interval;
        let mut portal_tick = tokio::time::interval_at(Instant::now() + period, period);
        portal_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut active: Option<JoinHandle<RecoveryOutcome>> = None;
        let mut events_open = true;

        tracing::info!(
            "Starting recovery supervisor (max retries: {}, backoff: {:?}..{:?})",
            self.config.max_retries,
            self.config.backoff.initial,
            self.config.backoff.max
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Recovery supervisor shutting down");
                    break;
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event, &mut active, &cancel).await,
                    None => {
                        tracing::warn!("Radio event stream closed");
                        events_open = false;
                    }
                },
                _ = portal_tick.tick() => {
                    self.orchestrator.recheck_portal().await;
                }
            }
        }

        if let Some(handle) = active {
            handle.abort();
        }
    }

    async fn handle_event(
        self: &Arc<Self>,
        event: RadioEvent,
        active: &mut Option<JoinHandle<RecoveryOutcome>>,
        cancel: &CancellationToken,
    ) {
        tracing::debug!("Radio event: {:?}", event);

        match &event {
            RadioEvent::ConnectivityRestored => {
                self.restored.store(true, Ordering::SeqCst);
                return;
            }
            RadioEvent::ConnectivityDegraded => {
                tracing::info!("Connectivity degraded");
                return;
            }
            RadioEvent::DeviceUnavailable => {
                tracing::warn!("Wireless device unavailable");
                return;
            }
            _ => {}
        }

        if !event.is_loss_trigger(self.orchestrator.ap_profile_name()) {
            return;
        }

        if active.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!("Recovery already running, ignoring {:?}", event);
            return;
        }

        let state = self.orchestrator.get_status().await;
        if state.connection_state != ConnectionState::Connected {
            tracing::debug!("Ignoring {:?} in state {}", event, state.connection_state);
            return;
        }
        if self.orchestrator.lock().is_held() {
            tracing::info!("Connection change in progress, skipping recovery for {:?}", event);
            return;
        }
        let Some(ssid) = state.network_info.ssid.clone() else {
            tracing::warn!("Connectivity lost but no network is recorded");
            return;
        };

        tracing::warn!("Connectivity lost ({:?}), starting recovery for {:?}", event, ssid);
        self.restored.store(false, Ordering::SeqCst);

        let this = Arc::clone(self);
        let cancel = cancel.child_token();
        *active = Some(tokio::spawn(async move {
            let outcome = this.recover(&ssid, cancel).await;
            tracing::info!("Recovery for {:?} finished: {:?}", ssid, outcome);
            outcome
        }));
    }

    /// Retry the saved network until it is verified, a user takes over, or
    /// the retry budget is spent
    pub async fn recover(&self, ssid: &str, cancel: CancellationToken) -> RecoveryOutcome {
        let store = self.orchestrator.store();
        let max = self.config.max_retries;
        let mut backoff = ExponentialBackoff::from_config(&self.config.backoff);

        {
            // Whoever holds the lock owns the published state
            let Some(_permit) = self.orchestrator.lock().try_acquire() else {
                tracing::info!("Connection change in progress, not starting recovery");
                return RecoveryOutcome::Preempted;
            };
            let state = store.get().await;
            if !state.is_connected() || state.network_info.ssid.as_deref() != Some(ssid) {
                tracing::info!("Connection changed before recovery started");
                return RecoveryOutcome::Preempted;
            }
            store
                .update(
                    StatePatch::new()
                        .state(ConnectionState::Connecting)
                        .progress(0.0, "Connection lost, reconnecting"),
                )
                .await;
        }

        for attempt in 1..=max {
            let delay = backoff.next_delay();
            {
                let Some(_permit) = self.orchestrator.lock().try_acquire() else {
                    tracing::info!("User took over the connection, stopping recovery");
                    return RecoveryOutcome::Preempted;
                };
                if store.get().await.connection_state != ConnectionState::Connecting {
                    tracing::info!("Connection changed while waiting, stopping recovery");
                    return RecoveryOutcome::Preempted;
                }
                store
                    .update(StatePatch::new().progress(
                        (attempt - 1) as f32 / max as f32,
                        format!(
                            "Reconnecting to {} in {}s (attempt {}/{})",
                            ssid,
                            delay.as_secs(),
                            attempt,
                            max
                        ),
                    ))
                    .await;
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return RecoveryOutcome::Cancelled,
            }

            let Some(permit) = self.orchestrator.lock().try_acquire() else {
                tracing::info!("User took over the connection, stopping recovery");
                return RecoveryOutcome::Preempted;
            };
            if store.get().await.connection_state != ConnectionState::Connecting {
                tracing::info!("Connection changed while waiting, stopping recovery");
                return RecoveryOutcome::Preempted;
            }

            let link = if self.restored.swap(false, Ordering::SeqCst) {
                tracing::info!("Connectivity restored, verifying link to {:?}", ssid);
                self.orchestrator.current_link(ssid).await
            } else {
                tracing::info!("Reconnection attempt {}/{} to {:?}", attempt, max, ssid);
                self.orchestrator.reconnect_saved(&permit, ssid).await
            };

            match link {
                Ok(status) => {
                    if self.orchestrator.probe().check_reachability().await {
                        let portal = match self.orchestrator.probe().detect_portal().await {
                            PortalVerdict::Portal { url } => Some(url),
                            _ => None,
                        };
                        self.orchestrator
                            .mark_connected(&permit, ssid, &status, portal)
                            .await;
                        return RecoveryOutcome::Recovered { attempts: attempt };
                    }
                    tracing::warn!("Link to {:?} is up but the internet is unreachable", ssid);
                }
                Err(FailureKind::StaleCredential) => {
                    let kind = FailureKind::StaleCredential;
                    self.orchestrator.fail_and_fallback(&permit, &kind).await;
                    return RecoveryOutcome::Failed(kind);
                }
                Err(kind) => {
                    tracing::warn!("Reconnection attempt {}/{} failed: {}", attempt, max, kind);
                }
            }
        }

        let Some(permit) = self.orchestrator.lock().try_acquire() else {
            return RecoveryOutcome::Preempted;
        };
        tracing::error!("Giving up on {:?} after {} attempts", ssid, max);
        self.orchestrator
            .fail_and_fallback(&permit, &FailureKind::RecoveryExhausted(max))
            .await;
        RecoveryOutcome::Exhausted { attempts: max }
    }
}
