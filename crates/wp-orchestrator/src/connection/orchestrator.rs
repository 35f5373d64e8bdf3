//! AP/client transitions
//!
//! One radio serves either the setup access point or a client connection,
//! never both. Every path into client mode tears the AP down first and every
//! path into AP mode tears the client down first.
//!
//! Radio-changing operations require a [`ConnectionPermit`]. User commands
//! take it with try-acquire and fail with [`ConnectError::Busy`] when the
//! recovery supervisor (or another command) already holds it.

use std::sync::Arc;

use thiserror::Error;

use wp_core::config::{ApConfig, ConnectionConfig, ProvisionerConfig};
use wp_core::time::current_time_millis;
use wp_core::traits::{ApProfile, DeviceState, Network, NetworkProbe, PortalVerdict, RadioDriver, RadioStatus};
use wp_core::{ConnectionState, DriverError, FailureKind, NetworkInfo, SystemState, ValidationError};

use super::classify::classify;
use super::lock::{ConnectionLock, ConnectionPermit};
use super::password::ap_password_for;
use super::validate::{check_profile, validate_password, validate_ssid};
use crate::store::{StatePatch, StateStore};

/// Errors returned by user commands
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Rejected input; no driver call was made
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Another connection change holds the lock
    #[error("Another connection change is in progress")]
    Busy,

    /// The attempt failed; the device has fallen back to AP mode
    #[error("{0}")]
    Failed(FailureKind),

    /// The radio could not be switched at all
    #[error("Radio error: {0}")]
    Driver(#[from] DriverError),
}

/// Drives the radio between setup AP and client mode
pub struct ConnectionOrchestrator {
    driver: Arc<dyn RadioDriver>,
    store: Arc<StateStore>,
    probe: Arc<dyn NetworkProbe>,
    ap: ApConfig,
    connection: ConnectionConfig,
    portal_session_ttl: std::time::Duration,
    lock: ConnectionLock,
}

impl ConnectionOrchestrator {
    pub fn new(
        driver: Arc<dyn RadioDriver>,
        store: Arc<StateStore>,
        probe: Arc<dyn NetworkProbe>,
        config: &ProvisionerConfig,
    ) -> Self {
        Self {
            driver,
            store,
            probe,
            ap: config.ap.clone(),
            connection: config.connection.clone(),
            portal_session_ttl: config.recovery.portal_session_ttl,
            lock: ConnectionLock::new(),
        }
    }

    pub fn lock(&self) -> &ConnectionLock {
        &self.lock
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn probe(&self) -> &Arc<dyn NetworkProbe> {
        &self.probe
    }

    pub fn ap_profile_name(&self) -> &str {
        &self.ap.profile_name
    }

    /// Current state snapshot. Does not take the connection lock.
    pub async fn get_status(&self) -> SystemState {
        self.store.get().await
    }

    /// Visible networks, strongest first, one entry per SSID
    pub async fn scan(&self) -> Result<Vec<Network>, DriverError> {
        let mut networks: Vec<Network> = Vec::new();
        for network in self.driver.scan().await? {
            if network.ssid.is_empty() {
                continue;
            }
            match networks.iter_mut().find(|n| n.ssid == network.ssid) {
                Some(existing) if network.signal > existing.signal => *existing = network,
                Some(_) => {}
                None => networks.push(network),
            }
        }
        networks.sort_by(|a, b| b.signal.cmp(&a.signal));
        Ok(networks)
    }

    /// Join `ssid`. On failure the device falls back to AP mode and the
    /// classified reason is returned.
    pub async fn connect(&self, ssid: &str, password: Option<&str>) -> Result<SystemState, ConnectError> {
        validate_ssid(ssid)?;
        validate_password(password)?;

        let permit = self.lock.try_acquire().ok_or(ConnectError::Busy)?;
        tracing::info!("Connecting to network {:?}", ssid);

        match self.join(&permit, ssid, password).await {
            Ok(state) => Ok(state),
            Err(kind) => {
                tracing::warn!("Connection to {:?} failed: {}", ssid, kind);
                self.fail_and_fallback(&permit, &kind).await;
                Err(ConnectError::Failed(kind))
            }
        }
    }

    /// Leave the client network and return to AP mode
    pub async fn disconnect(&self) -> Result<SystemState, ConnectError> {
        let permit = self.lock.try_acquire().ok_or(ConnectError::Busy)?;
        tracing::info!("Disconnecting from client network");

        self.store
            .update(
                StatePatch::new()
                    .state(ConnectionState::Disconnected)
                    .clear_error()
                    .progress(0.0, "Disconnecting"),
            )
            .await;
        Ok(self.start_ap_mode(&permit).await?)
    }

    /// Initial transition at start-up: adopt a working client connection,
    /// rejoin the last saved network, or start the setup AP
    pub async fn bootstrap(&self) -> SystemState {
        let Some(permit) = self.lock.try_acquire() else {
            tracing::warn!("Connection lock held during bootstrap");
            return self.store.get().await;
        };

        match self.driver.get_status().await {
            Ok(status) => {
                if let Some(ssid) = self.adoptable(&status) {
                    tracing::info!("Adopting active connection to {:?}", ssid);
                    match self.verify_internet().await {
                        Ok(portal) => return self.mark_connected(&permit, &ssid, &status, portal).await,
                        Err(kind) => tracing::warn!("Active connection unusable: {}", kind),
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to query radio status: {}", e),
        }

        let previous = self.store.get().await;
        if let Some(ssid) = previous.network_info.ssid.clone() {
            if matches!(self.driver.profile_exists(&ssid).await, Ok(true)) {
                tracing::info!("Rejoining saved network {:?}", ssid);
                match self.join(&permit, &ssid, None).await {
                    Ok(state) => return state,
                    Err(kind) => tracing::warn!("Rejoining {:?} failed: {}", ssid, kind),
                }
            }
        }

        match self.start_ap_mode(&permit).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to start setup access point: {}", e);
                self.store.get().await
            }
        }
    }

    fn adoptable(&self, status: &RadioStatus) -> Option<String> {
        let profile = status.active_profile.as_deref()?;
        if profile == self.ap.profile_name || status.device_state != DeviceState::Connected {
            return None;
        }
        status.ssid.clone()
    }

    /// Reactivate the saved profile for `ssid` and verify the link.
    /// Reachability is left to the caller.
    pub async fn reconnect_saved(
        &self,
        _permit: &ConnectionPermit,
        ssid: &str,
    ) -> Result<RadioStatus, FailureKind> {
        self.establish(ssid, None).await
    }

    /// Captive-portal detection, falling back to a reachability check when
    /// detection is inconclusive. Returns the portal URL, if any.
    pub async fn verify_internet(&self) -> Result<Option<String>, FailureKind> {
        match self.probe.detect_portal().await {
            PortalVerdict::Portal { url } => Ok(Some(url)),
            PortalVerdict::Clear => Ok(None),
            PortalVerdict::Inconclusive => {
                if self.probe.check_reachability().await {
                    Ok(None)
                } else {
                    Err(FailureKind::NoInternet)
                }
            }
        }
    }

    /// Publish CONNECTED for a verified link
    pub async fn mark_connected(
        &self,
        _permit: &ConnectionPermit,
        ssid: &str,
        status: &RadioStatus,
        portal: Option<String>,
    ) -> SystemState {
        let now = current_time_millis();
        let scanned = self.signal_for(ssid).await;

        let info = NetworkInfo {
            ssid: Some(ssid.to_string()),
            ip_address: status.ip.clone(),
            signal_strength: scanned.as_ref().map(|n| n.signal),
            security: scanned.map(|n| n.security).filter(|s| !s.is_empty()),
            connected_at: Some(now),
        };

        let mut patch = StatePatch::new()
            .state(ConnectionState::Connected)
            .network(info)
            .clear_error()
            .retry_count(0)
            .progress(1.0, format!("Connected to {}", ssid));
        patch = match portal {
            Some(url) => {
                let expires = now + self.portal_session_ttl.as_millis() as u64;
                patch.portal(url, now, expires)
            }
            None => patch.clear_portal(),
        };

        tracing::info!("Connected to {:?} ({:?})", ssid, status.ip);
        self.store.update(patch).await
    }

    async fn signal_for(&self, ssid: &str) -> Option<Network> {
        match self.driver.scan().await {
            Ok(networks) => networks
                .into_iter()
                .filter(|n| n.ssid == ssid)
                .max_by_key(|n| n.signal),
            Err(e) => {
                tracing::debug!("Scan for signal strength failed: {}", e);
                None
            }
        }
    }

    async fn join(
        &self,
        permit: &ConnectionPermit,
        ssid: &str,
        password: Option<&str>,
    ) -> Result<SystemState, FailureKind> {
        self.store
            .update(
                StatePatch::new()
                    .state(ConnectionState::Switching)
                    .network(NetworkInfo::for_ssid(ssid))
                    .clear_error()
                    .progress(0.05, "Stopping setup network"),
            )
            .await;

        let status = self.establish(ssid, password).await?;

        self.store
            .update(StatePatch::new().progress(0.85, "Checking internet access"))
            .await;
        let portal = self.verify_internet().await?;

        Ok(self.mark_connected(permit, ssid, &status, portal).await)
    }

    /// Tear down the AP, activate a client profile and verify the link
    async fn establish(&self, ssid: &str, password: Option<&str>) -> Result<RadioStatus, FailureKind> {
        self.teardown_ap().await.map_err(|e| classify(&e))?;

        self.store
            .update(
                StatePatch::new()
                    .state(ConnectionState::Connecting)
                    .network(NetworkInfo::for_ssid(ssid))
                    .progress(0.2, format!("Connecting to {}", ssid)),
            )
            .await;

        self.activate_client(ssid, password).await?;

        self.store
            .update(StatePatch::new().progress(0.7, "Verifying connection"))
            .await;
        self.verify_link(ssid).await
    }

    async fn activate_client(&self, ssid: &str, password: Option<&str>) -> Result<(), FailureKind> {
        let mut saved = self
            .driver
            .profile_exists(ssid)
            .await
            .map_err(|e| classify(&e))?;

        if saved && !self.saved_profile_trusted(ssid).await {
            self.delete_profile_quietly(ssid).await;
            saved = false;
        }

        if saved {
            self.store
                .update(StatePatch::new().progress(0.3, "Activating saved network"))
                .await;
            match self.driver.activate(ssid).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let kind = classify(&e);
                    if kind.is_credential_failure() {
                        tracing::warn!("Saved credentials for {:?} rejected, deleting profile", ssid);
                        self.delete_profile_quietly(ssid).await;
                        if password.is_none() {
                            return Err(FailureKind::StaleCredential);
                        }
                    } else {
                        tracing::info!("Saved profile for {:?} failed ({}), recreating", ssid, kind);
                        self.delete_profile_quietly(ssid).await;
                    }
                }
            }
        }

        self.store
            .update(StatePatch::new().progress(0.4, format!("Joining {}", ssid)))
            .await;
        if let Err(e) = self.driver.connect_profile(ssid, password).await {
            let kind = classify(&e);
            if matches!(self.driver.profile_exists(ssid).await, Ok(true)) {
                self.delete_profile_quietly(ssid).await;
            }
            return Err(kind);
        }
        Ok(())
    }

    async fn saved_profile_trusted(&self, ssid: &str) -> bool {
        match self.driver.inspect_profile(ssid).await {
            Ok(Some(inspection)) => match check_profile(&inspection) {
                Ok(()) => true,
                Err(problem) => {
                    tracing::warn!("Saved profile for {:?} rejected: {}", ssid, problem);
                    false
                }
            },
            Ok(None) => {
                tracing::warn!("Saved profile for {:?} cannot be inspected", ssid);
                false
            }
            Err(e) => {
                tracing::warn!("Failed to inspect saved profile for {:?}: {}", ssid, e);
                false
            }
        }
    }

    async fn delete_profile_quietly(&self, name: &str) {
        if let Err(e) = self.driver.delete_profile(name).await {
            tracing::warn!("Failed to delete profile {:?}: {}", name, e);
        }
    }

    /// Wait for the link to settle, then check the radio really joined `ssid`
    async fn verify_link(&self, ssid: &str) -> Result<RadioStatus, FailureKind> {
        tokio::time::sleep(self.connection.settle_time).await;
        self.current_link(ssid).await
    }

    /// Query the radio and require it to be joined to `ssid`
    pub async fn current_link(&self, ssid: &str) -> Result<RadioStatus, FailureKind> {
        let status = match tokio::time::timeout(self.connection.status_timeout, self.driver.get_status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(FailureKind::VerificationFailed(e.to_string())),
            Err(_) => {
                return Err(FailureKind::VerificationFailed(
                    "status query timed out".to_string(),
                ))
            }
        };

        if status.ssid.as_deref() != Some(ssid) {
            return Err(FailureKind::VerificationFailed(format!(
                "radio reports {:?} instead of {:?}",
                status.ssid.as_deref().unwrap_or("no network"),
                ssid
            )));
        }
        Ok(status)
    }

    /// Publish FAILED with the reason, then return to AP mode
    pub async fn fail_and_fallback(&self, permit: &ConnectionPermit, kind: &FailureKind) -> SystemState {
        let retries = self.store.get().await.retry_count;
        self.store
            .update(
                StatePatch::new()
                    .state(ConnectionState::Failed)
                    .error(kind.to_string())
                    .retry_count(retries.saturating_add(1))
                    .progress(0.0, "Connection failed"),
            )
            .await;

        match self.start_ap_mode(permit).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to start setup access point: {}", e);
                self.store.get().await
            }
        }
    }

    /// Tear down any client connection and bring up the setup AP
    pub async fn start_ap_mode(&self, _permit: &ConnectionPermit) -> Result<SystemState, DriverError> {
        if let Err(e) = self.teardown_client().await {
            tracing::error!("Client connection still up, not starting setup access point: {}", e);
            self.store
                .update(
                    StatePatch::new()
                        .state(ConnectionState::Disconnected)
                        .error(format!("Failed to leave client network: {}", e))
                        .progress(0.0, "Setup network unavailable"),
                )
                .await;
            return Err(e);
        }

        let state = self.store.get().await;
        let now = current_time_millis();
        let chosen = ap_password_for(&state, self.ap.password_ttl, self.ap.password_length, now);
        if chosen.fresh {
            tracing::info!("Generated new setup AP password");
        }

        let profile = ApProfile {
            name: self.ap.profile_name.clone(),
            ssid: self.ap.ssid.clone(),
            password: chosen.password.clone(),
            ip: self.ap.ip.clone(),
            channel: self.ap.channel,
        };

        let result = async {
            self.driver.create_ap_profile(&profile).await?;
            self.driver.activate(&profile.name).await
        }
        .await;

        if let Err(e) = result {
            self.store
                .update(
                    StatePatch::new()
                        .state(ConnectionState::Disconnected)
                        .error(format!("Setup network unavailable: {}", e))
                        .progress(0.0, "Setup network unavailable"),
                )
                .await;
            return Err(e);
        }

        tracing::info!("Setup access point {:?} active", profile.ssid);
        Ok(self
            .store
            .update(
                StatePatch::new()
                    .state(ConnectionState::ApMode)
                    .ap_password(chosen.password, chosen.generated_at)
                    .progress(0.0, format!("Join {} to set up", profile.ssid)),
            )
            .await)
    }

    async fn teardown_ap(&self) -> Result<(), DriverError> {
        let status = self.driver.get_status().await?;
        if status.active_profile.as_deref() == Some(self.ap.profile_name.as_str()) {
            tracing::info!("Stopping setup access point");
            self.driver.deactivate(&self.ap.profile_name).await?;
        }
        Ok(())
    }

    /// Deactivate any active client profile. A failed status query counts
    /// as failure since the client cannot be shown to be down.
    async fn teardown_client(&self) -> Result<(), DriverError> {
        let status = self.driver.get_status().await?;
        if let Some(profile) = status.active_profile {
            if profile != self.ap.profile_name {
                tracing::info!("Deactivating client profile {:?}", profile);
                self.driver.deactivate(&profile).await?;
            }
        }
        Ok(())
    }

    /// Re-probe a known captive portal. Clears the portal once the user has
    /// logged in and refreshes the detection when it has expired.
    pub async fn recheck_portal(&self) -> SystemState {
        let state = self.store.get().await;
        let Some(current) = state.captive_portal_url.clone() else {
            return state;
        };
        if !state.is_connected() || self.lock.is_held() {
            return state;
        }

        let now = current_time_millis();
        match self.probe.detect_portal().await {
            PortalVerdict::Clear => {
                tracing::info!("Captive portal cleared");
                self.store.update(StatePatch::new().clear_portal()).await
            }
            PortalVerdict::Portal { url } => {
                let expired = state
                    .captive_portal_session_expires_at
                    .map_or(true, |at| now >= at);
                if expired || url != current {
                    tracing::info!("Captive portal re-detected: {}", url);
                    let expires = now + self.portal_session_ttl.as_millis() as u64;
                    self.store
                        .update(StatePatch::new().portal(url, now, expires))
                        .await
                } else {
                    state
                }
            }
            PortalVerdict::Inconclusive => state,
        }
    }

    /// Best-effort radio teardown on shutdown
    pub async fn teardown_all(&self) {
        match self.driver.get_status().await {
            Ok(RadioStatus {
                active_profile: Some(profile),
                ..
            }) => {
                tracing::info!("Deactivating {:?} for shutdown", profile);
                if let Err(e) = self.driver.deactivate(&profile).await {
                    tracing::warn!("Failed to deactivate {:?}: {}", profile, e);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to query radio status on shutdown: {}", e),
        }
    }
}
