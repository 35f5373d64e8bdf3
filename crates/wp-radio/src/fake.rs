//! In-memory radio for tests
//!
//! Models one radio with at most one active profile. Activating a client
//! profile while the AP is up (or the AP while a client is up) is recorded as
//! a mutual-exclusion violation instead of silently switching, so tests can
//! assert that the orchestrator always tears one mode down first.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use wp_core::traits::{
    ApProfile, DeviceState, Network, ProfileInspection, RadioDriver, RadioEvent, RadioStatus,
    RADIO_EVENT_CHANNEL_CAPACITY,
};
use wp_core::DriverError;

/// Address handed out to fake client connections
pub const FAKE_CLIENT_IP: &str = "192.168.1.50";

#[derive(Debug, Clone)]
struct FakeNetwork {
    password: Option<String>,
    signal: u8,
}

#[derive(Debug, Clone)]
enum ProfileKind {
    Ap(ApProfile),
    Client { ssid: String, password: Option<String> },
}

#[derive(Debug, Clone)]
struct FakeProfile {
    kind: ProfileKind,
    inspection: ProfileInspection,
}

#[derive(Default)]
struct FakeState {
    networks: HashMap<String, FakeNetwork>,
    profiles: HashMap<String, FakeProfile>,
    active: Option<String>,
    calls: Vec<String>,
    violations: u32,
    scripted_failures: VecDeque<(&'static str, String)>,
    reported_ssid: Option<Option<String>>,
}

impl FakeState {
    fn take_failure(&mut self, verb: &'static str) -> Option<DriverError> {
        let pos = self.scripted_failures.iter().position(|(v, _)| *v == verb)?;
        let (_, message) = self.scripted_failures.remove(pos)?;
        Some(DriverError::Command { verb, message })
    }

    fn is_ap(&self, name: &str) -> bool {
        matches!(
            self.profiles.get(name).map(|p| &p.kind),
            Some(ProfileKind::Ap(_))
        )
    }

    fn bring_up(&mut self, name: &str) -> Result<(), DriverError> {
        let profile = self
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::Command {
                verb: "activate",
                message: format!("Error: unknown connection '{}'.", name),
            })?;

        if let Some(active) = self.active.clone() {
            if active != name && self.is_ap(&active) != self.is_ap(name) {
                tracing::error!(
                    "Mutual exclusion violated: activating {} while {} is active",
                    name,
                    active
                );
                self.violations += 1;
            }
        }

        if let ProfileKind::Client { ssid, password } = &profile.kind {
            let network = self.networks.get(ssid).ok_or_else(|| DriverError::Command {
                verb: "activate",
                message: format!("Error: No network with SSID '{}' found.", ssid),
            })?;
            if network.password.is_some() && network.password != *password {
                return Err(DriverError::Command {
                    verb: "activate",
                    message: "Error: Connection activation failed: Secrets were required, but not provided.".to_string(),
                });
            }
        }

        self.active = Some(name.to_string());
        Ok(())
    }
}

/// In-memory [`RadioDriver`]
#[derive(Default)]
pub struct FakeRadio {
    state: Mutex<FakeState>,
    subscribers: Mutex<Vec<mpsc::Sender<RadioEvent>>>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        // A panicking test thread must not cascade into unrelated assertions
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make a network visible. `password: None` is an open network.
    pub fn add_network(&self, ssid: &str, password: Option<&str>, signal: u8) {
        self.lock().networks.insert(
            ssid.to_string(),
            FakeNetwork {
                password: password.map(str::to_string),
                signal,
            },
        );
    }

    /// Take a network out of range
    pub fn remove_network(&self, ssid: &str) {
        self.lock().networks.remove(ssid);
    }

    /// Change a network's password, making saved profiles stale
    pub fn change_password(&self, ssid: &str, password: &str) {
        if let Some(network) = self.lock().networks.get_mut(ssid) {
            network.password = Some(password.to_string());
        }
    }

    /// Insert a saved client profile owned by root with mode 0600
    pub fn insert_client_profile(&self, ssid: &str, password: Option<&str>) {
        let profile = FakeProfile {
            kind: ProfileKind::Client {
                ssid: ssid.to_string(),
                password: password.map(str::to_string),
            },
            inspection: default_inspection(ssid),
        };
        self.lock().profiles.insert(ssid.to_string(), profile);
    }

    /// Override what `inspect_profile` reports for a saved profile
    pub fn set_inspection(&self, name: &str, inspection: ProfileInspection) {
        if let Some(profile) = self.lock().profiles.get_mut(name) {
            profile.inspection = inspection;
        }
    }

    /// Make the next call of `verb` fail with `message`
    pub fn fail_next(&self, verb: &'static str, message: &str) {
        self.lock()
            .scripted_failures
            .push_back((verb, message.to_string()));
    }

    /// Force the SSID reported by `get_status`, regardless of the active profile
    pub fn report_ssid(&self, ssid: Option<&str>) {
        self.lock().reported_ssid = Some(ssid.map(str::to_string));
    }

    /// Drop the active client link and emit the events NetworkManager would
    pub async fn drop_link(&self) {
        let dropped = {
            let mut state = self.lock();
            match state.active.clone() {
                Some(name) if !state.is_ap(&name) => {
                    state.active = None;
                    Some(name)
                }
                _ => None,
            }
        };
        if let Some(name) = dropped {
            self.emit(RadioEvent::ConnectionDeactivated { name }).await;
            self.emit(RadioEvent::ConnectivityLost).await;
        }
    }

    /// Deliver an event to every open event stream
    pub async fn emit(&self, event: RadioEvent) {
        let subscribers: Vec<_> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for tx in subscribers {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Verbs called so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of times AP and client mode would have been up together
    pub fn violations(&self) -> u32 {
        self.lock().violations
    }

    /// Name of the active profile
    pub fn active_profile(&self) -> Option<String> {
        self.lock().active.clone()
    }

    /// Whether a saved profile exists
    pub fn has_profile(&self, name: &str) -> bool {
        self.lock().profiles.contains_key(name)
    }

    /// Password of the saved AP profile, if one was created
    pub fn ap_password(&self, name: &str) -> Option<String> {
        match self.lock().profiles.get(name).map(|p| &p.kind) {
            Some(ProfileKind::Ap(ap)) => Some(ap.password.clone()),
            _ => None,
        }
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, FakeState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }
}

fn default_inspection(ssid: &str) -> ProfileInspection {
    ProfileInspection {
        owner_uid: 0,
        mode: 0o600,
        contents: format!("[connection]\nid={ssid}\ntype=wifi\n\n[wifi]\nssid={ssid}\n"),
    }
}

#[async_trait]
impl RadioDriver for FakeRadio {
    async fn detect_device(&self) -> Result<String, DriverError> {
        let mut state = self.record("detect_device".to_string());
        match state.take_failure("detect_device") {
            Some(err) => Err(err),
            None => Ok("wlan0".to_string()),
        }
    }

    async fn scan(&self) -> Result<Vec<Network>, DriverError> {
        let mut state = self.record("scan".to_string());
        if let Some(err) = state.take_failure("scan") {
            return Err(err);
        }
        let active_ssid = state.active.as_ref().and_then(|name| match state.profiles.get(name) {
            Some(FakeProfile {
                kind: ProfileKind::Client { ssid, .. },
                ..
            }) => Some(ssid.clone()),
            _ => None,
        });
        Ok(state
            .networks
            .iter()
            .map(|(ssid, net)| Network {
                ssid: ssid.clone(),
                signal: net.signal,
                security: if net.password.is_some() { "WPA2" } else { "" }.to_string(),
                in_use: active_ssid.as_deref() == Some(ssid.as_str()),
            })
            .collect())
    }

    async fn create_ap_profile(&self, profile: &ApProfile) -> Result<(), DriverError> {
        let mut state = self.record(format!("create_ap_profile:{}", profile.name));
        if let Some(err) = state.take_failure("create_ap_profile") {
            return Err(err);
        }
        state.profiles.insert(
            profile.name.clone(),
            FakeProfile {
                kind: ProfileKind::Ap(profile.clone()),
                inspection: default_inspection(&profile.ssid),
            },
        );
        Ok(())
    }

    async fn activate(&self, profile: &str) -> Result<(), DriverError> {
        let mut state = self.record(format!("activate:{}", profile));
        if let Some(err) = state.take_failure("activate") {
            return Err(err);
        }
        state.bring_up(profile)
    }

    async fn deactivate(&self, profile: &str) -> Result<(), DriverError> {
        let mut state = self.record(format!("deactivate:{}", profile));
        if let Some(err) = state.take_failure("deactivate") {
            return Err(err);
        }
        if state.active.as_deref() == Some(profile) {
            state.active = None;
            Ok(())
        } else {
            Err(DriverError::Command {
                verb: "deactivate",
                message: format!("Error: '{}' is not an active connection.", profile),
            })
        }
    }

    async fn connect_profile(&self, ssid: &str, password: Option<&str>) -> Result<(), DriverError> {
        let mut state = self.record(format!("connect_profile:{}", ssid));
        if let Some(err) = state.take_failure("connect_profile") {
            return Err(err);
        }
        if !state.networks.contains_key(ssid) {
            return Err(DriverError::Command {
                verb: "connect_profile",
                message: format!("Error: No network with SSID '{}' found.", ssid),
            });
        }
        state.profiles.insert(
            ssid.to_string(),
            FakeProfile {
                kind: ProfileKind::Client {
                    ssid: ssid.to_string(),
                    password: password.map(str::to_string),
                },
                inspection: default_inspection(ssid),
            },
        );
        state.bring_up(ssid).map_err(|e| DriverError::Command {
            verb: "connect_profile",
            message: e.message(),
        })
    }

    async fn get_status(&self) -> Result<RadioStatus, DriverError> {
        let mut state = self.record("get_status".to_string());
        if let Some(err) = state.take_failure("get_status") {
            return Err(err);
        }

        let mut status = match state.active.as_ref().and_then(|n| state.profiles.get(n)) {
            Some(FakeProfile {
                kind: ProfileKind::Client { ssid, .. },
                ..
            }) => RadioStatus {
                ssid: Some(ssid.clone()),
                ip: Some(FAKE_CLIENT_IP.to_string()),
                device_state: DeviceState::Connected,
                active_profile: state.active.clone(),
            },
            Some(FakeProfile {
                kind: ProfileKind::Ap(ap),
                ..
            }) => RadioStatus {
                ssid: Some(ap.ssid.clone()),
                ip: ap.ip.split('/').next().map(str::to_string),
                device_state: DeviceState::Connected,
                active_profile: state.active.clone(),
            },
            None => RadioStatus::idle(),
        };

        if let Some(reported) = state.reported_ssid.clone() {
            status.ssid = reported;
        }
        Ok(status)
    }

    async fn delete_profile(&self, name: &str) -> Result<(), DriverError> {
        let mut state = self.record(format!("delete_profile:{}", name));
        if let Some(err) = state.take_failure("delete_profile") {
            return Err(err);
        }
        if state.active.as_deref() == Some(name) {
            state.active = None;
        }
        state.profiles.remove(name);
        Ok(())
    }

    async fn profile_exists(&self, name: &str) -> Result<bool, DriverError> {
        let state = self.lock();
        Ok(state.profiles.contains_key(name))
    }

    async fn inspect_profile(&self, name: &str) -> Result<Option<ProfileInspection>, DriverError> {
        let state = self.lock();
        Ok(state.profiles.get(name).map(|p| p.inspection.clone()))
    }

    async fn event_stream(&self) -> Result<mpsc::Receiver<RadioEvent>, DriverError> {
        let (tx, rx) = mpsc::channel(RADIO_EVENT_CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ap() -> ApProfile {
        ApProfile {
            name: "setup-ap".to_string(),
            ssid: "Device-Setup".to_string(),
            password: "abcdefgh1234".to_string(),
            ip: "192.168.4.1/24".to_string(),
            channel: 6,
        }
    }

    #[tokio::test]
    async fn test_connect_and_status() {
        let radio = FakeRadio::new();
        radio.add_network("Home Wifi", Some("correct horse"), 70);

        radio
            .connect_profile("Home Wifi", Some("correct horse"))
            .await
            .unwrap();
        let status = radio.get_status().await.unwrap();
        assert_eq!(status.ssid.as_deref(), Some("Home Wifi"));
        assert_eq!(status.ip.as_deref(), Some(FAKE_CLIENT_IP));
        assert_eq!(radio.violations(), 0);
    }

    #[tokio::test]
    async fn test_wrong_password_reports_secrets_error() {
        let radio = FakeRadio::new();
        radio.add_network("Home Wifi", Some("correct horse"), 70);

        let err = radio
            .connect_profile("Home Wifi", Some("wrong horse"))
            .await
            .unwrap_err();
        assert!(err.message().contains("Secrets were required"));
        assert!(radio.active_profile().is_none());
    }

    #[tokio::test]
    async fn test_activating_client_over_ap_is_a_violation() {
        let radio = FakeRadio::new();
        radio.add_network("Home Wifi", None, 70);
        radio.create_ap_profile(&ap()).await.unwrap();
        radio.activate("setup-ap").await.unwrap();

        radio.connect_profile("Home Wifi", None).await.unwrap();
        assert_eq!(radio.violations(), 1);
    }

    #[tokio::test]
    async fn test_teardown_first_is_not_a_violation() {
        let radio = FakeRadio::new();
        radio.add_network("Home Wifi", None, 70);
        radio.create_ap_profile(&ap()).await.unwrap();
        radio.activate("setup-ap").await.unwrap();

        radio.deactivate("setup-ap").await.unwrap();
        radio.connect_profile("Home Wifi", None).await.unwrap();
        assert_eq!(radio.violations(), 0);
        assert_eq!(radio.active_profile().as_deref(), Some("Home Wifi"));
    }

    #[tokio::test]
    async fn test_scripted_failure_is_one_shot() {
        let radio = FakeRadio::new();
        radio.fail_next("scan", "Error: Scanning not allowed");
        assert!(radio.scan().await.is_err());
        assert!(radio.scan().await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_link_emits_events() {
        let radio = FakeRadio::new();
        radio.add_network("Home Wifi", None, 70);
        let mut events = radio.event_stream().await.unwrap();
        radio.connect_profile("Home Wifi", None).await.unwrap();

        radio.drop_link().await;
        assert_eq!(
            events.recv().await,
            Some(RadioEvent::ConnectionDeactivated {
                name: "Home Wifi".to_string()
            })
        );
        assert_eq!(events.recv().await, Some(RadioEvent::ConnectivityLost));
        assert!(radio.active_profile().is_none());
    }
}
