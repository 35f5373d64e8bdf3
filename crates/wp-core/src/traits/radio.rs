//! Radio driver traits
//!
//! The orchestrator drives the wireless radio exclusively through
//! [`RadioDriver`]. Implementations own all command execution and output
//! parsing; nothing above this trait sees driver text except error messages
//! that are classified into [`crate::FailureKind`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::DriverError;

/// Channel capacity for radio events.
///
/// Events are rare (link changes), so a small buffer is enough; a slow
/// consumer only delays reconnection decisions.
pub const RADIO_EVENT_CHANNEL_CAPACITY: usize = 64;

/// A network seen during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub ssid: String,
    /// Signal strength in percent (0-100)
    pub signal: u8,
    /// Security description, empty for open networks
    pub security: String,
    /// Whether the radio is currently associated with this network
    pub in_use: bool,
}

/// State of the wireless device as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Connected,
    Connecting,
    Disconnected,
    Unavailable,
    Unmanaged,
    Unknown(String),
}

/// Snapshot of the radio's link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioStatus {
    /// SSID the radio is associated with, if any
    pub ssid: Option<String>,
    /// IPv4 address on the wireless device, if any
    pub ip: Option<String>,
    pub device_state: DeviceState,
    /// Name of the active connection profile, if any
    pub active_profile: Option<String>,
}

impl RadioStatus {
    /// Status of a radio with nothing active
    pub fn idle() -> Self {
        Self {
            ssid: None,
            ip: None,
            device_state: DeviceState::Disconnected,
            active_profile: None,
        }
    }
}

/// Parameters of the setup access point profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApProfile {
    /// Profile name (used for activate/deactivate)
    pub name: String,
    pub ssid: String,
    pub password: String,
    /// Gateway address with prefix, e.g. "192.168.4.1/24"
    pub ip: String,
    pub channel: u8,
}

/// Ownership, permissions and contents of a saved connection profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInspection {
    pub owner_uid: u32,
    /// Unix permission bits
    pub mode: u32,
    pub contents: String,
}

/// Classified line from the driver's event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    ConnectivityLost,
    ConnectivityDegraded,
    ConnectivityRestored,
    DeviceDisconnected,
    DeviceUnavailable,
    ConnectionDeactivated { name: String },
}

impl RadioEvent {
    /// Whether this event can indicate loss of the client connection.
    ///
    /// `ap_profile` is excluded: its deactivation is always orchestrator-initiated.
    pub fn is_loss_trigger(&self, ap_profile: &str) -> bool {
        match self {
            RadioEvent::ConnectivityLost | RadioEvent::DeviceDisconnected => true,
            RadioEvent::ConnectionDeactivated { name } => name != ap_profile,
            _ => false,
        }
    }
}

/// Abstraction over the wireless radio management stack
#[async_trait]
pub trait RadioDriver: Send + Sync {
    /// Find the wireless device, returning its interface name
    async fn detect_device(&self) -> Result<String, DriverError>;

    /// Scan for visible networks
    async fn scan(&self) -> Result<Vec<Network>, DriverError>;

    /// Create (or replace) the access point profile. Does not activate it.
    async fn create_ap_profile(&self, profile: &ApProfile) -> Result<(), DriverError>;

    /// Activate a saved profile by name
    async fn activate(&self, profile: &str) -> Result<(), DriverError>;

    /// Deactivate an active profile by name
    async fn deactivate(&self, profile: &str) -> Result<(), DriverError>;

    /// Create a client profile named after `ssid` and activate it
    async fn connect_profile(&self, ssid: &str, password: Option<&str>)
        -> Result<(), DriverError>;

    /// Query the current link status
    async fn get_status(&self) -> Result<RadioStatus, DriverError>;

    /// Delete a saved profile
    async fn delete_profile(&self, name: &str) -> Result<(), DriverError>;

    /// Whether a saved profile with this name exists
    async fn profile_exists(&self, name: &str) -> Result<bool, DriverError>;

    /// Read ownership, permissions and contents of a saved profile
    async fn inspect_profile(&self, name: &str)
        -> Result<Option<ProfileInspection>, DriverError>;

    /// Start the event stream. Each call returns an independent receiver.
    async fn event_stream(&self) -> Result<mpsc::Receiver<RadioEvent>, DriverError>;
}
