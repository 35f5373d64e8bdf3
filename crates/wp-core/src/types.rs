//! Core domain types
//!
//! [`SystemState`] is the single source of truth for the device's
//! connectivity. It is owned by the orchestrator's state store; everything
//! else works on cloned snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Connectivity state of the radio. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Radio is serving the setup access point
    ApMode,
    /// Tearing down one radio mode before entering the other
    Switching,
    /// Joining a client network
    Connecting,
    /// Joined and verified
    Connected,
    /// Last attempt failed; about to fall back to AP mode
    Failed,
    /// No AP and no client connection
    #[default]
    Disconnected,
}

impl ConnectionState {
    /// Whether network info is meaningful in this state
    pub fn carries_network_info(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::ApMode => write!(f, "AP_MODE"),
            ConnectionState::Switching => write!(f, "SWITCHING"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Failed => write!(f, "FAILED"),
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

/// Details of the client network being joined or joined
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInfo {
    /// Network name
    pub ssid: Option<String>,
    /// Address assigned by DHCP
    pub ip_address: Option<String>,
    /// Signal strength in percent (0-100)
    pub signal_strength: Option<u8>,
    /// Security description (e.g. "WPA2")
    pub security: Option<String>,
    /// When the connection was verified (Unix ms)
    pub connected_at: Option<u64>,
}

impl NetworkInfo {
    /// Network info for a network that is about to be joined
    pub fn for_ssid(ssid: impl Into<String>) -> Self {
        Self {
            ssid: Some(ssid.into()),
            ..Self::default()
        }
    }

    /// Whether all fields are cleared
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A companion-UI session, tracked independently of connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// When the session was first seen (Unix ms)
    pub created_at: u64,
    /// When the session was last seen (Unix ms)
    pub last_seen: u64,
}

/// Health of the on-disk state snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceHealth {
    /// Last write succeeded
    #[default]
    Healthy,
    /// 1-3 consecutive write failures
    Degraded,
    /// More than 3 consecutive write failures
    Failed,
}

impl PersistenceHealth {
    /// Health level implied by a number of consecutive failures
    pub fn from_failures(failures: u32) -> Self {
        match failures {
            0 => PersistenceHealth::Healthy,
            1..=3 => PersistenceHealth::Degraded,
            _ => PersistenceHealth::Failed,
        }
    }
}

impl fmt::Display for PersistenceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceHealth::Healthy => write!(f, "healthy"),
            PersistenceHealth::Degraded => write!(f, "degraded"),
            PersistenceHealth::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate, externally observable system state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemState {
    pub connection_state: ConnectionState,
    pub network_info: NetworkInfo,

    /// Public URL of the active reverse tunnel. Only set while connected.
    pub tunnel_url: Option<String>,
    /// Name of the provider serving `tunnel_url`
    pub tunnel_provider: Option<String>,

    pub ap_password: Option<String>,
    pub ap_password_generated_at: Option<u64>,

    pub captive_portal_url: Option<String>,
    pub captive_portal_detected_at: Option<u64>,
    pub captive_portal_session_expires_at: Option<u64>,

    pub error_message: Option<String>,
    pub retry_count: u32,
    /// Progress of the current operation (0.0-1.0)
    pub connection_progress: f32,
    /// Human readable status for granular UI feedback
    pub connection_status: String,

    pub sessions: HashMap<String, SessionInfo>,

    pub persistence_health: PersistenceHealth,
    pub persistence_failures: u32,
    pub persistence_last_failure: Option<u64>,

    pub updated_at: u64,
}

impl SystemState {
    /// Whether the device is joined to a client network
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// Whether a captive portal is currently blocking access
    pub fn behind_captive_portal(&self) -> bool {
        self.is_connected() && self.captive_portal_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_serde_names() {
        let json = serde_json::to_string(&ConnectionState::ApMode).unwrap();
        assert_eq!(json, "\"AP_MODE\"");
        let parsed: ConnectionState = serde_json::from_str("\"CONNECTED\"").unwrap();
        assert_eq!(parsed, ConnectionState::Connected);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Switching), "SWITCHING");
        assert_eq!(format!("{}", ConnectionState::Disconnected), "DISCONNECTED");
    }

    #[test]
    fn test_fresh_state_has_no_radio_mode() {
        assert_eq!(SystemState::default().connection_state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_persistence_health_from_failures() {
        assert_eq!(PersistenceHealth::from_failures(0), PersistenceHealth::Healthy);
        assert_eq!(PersistenceHealth::from_failures(1), PersistenceHealth::Degraded);
        assert_eq!(PersistenceHealth::from_failures(3), PersistenceHealth::Degraded);
        assert_eq!(PersistenceHealth::from_failures(4), PersistenceHealth::Failed);
    }

    #[test]
    fn test_system_state_tolerates_missing_fields() {
        let state: SystemState =
            serde_json::from_str(r#"{"connection_state":"CONNECTED"}"#).unwrap();
        assert!(state.is_connected());
        assert!(state.network_info.is_empty());
        assert!(state.sessions.is_empty());
    }

    #[test]
    fn test_network_info_for_ssid() {
        let info = NetworkInfo::for_ssid("Home Wifi");
        assert_eq!(info.ssid.as_deref(), Some("Home Wifi"));
        assert!(!info.is_empty());
    }
}
