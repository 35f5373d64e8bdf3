//! Provisioner daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use super::{ProbeConfig, TunnelConfig};
use crate::error::ConfigError;

/// Configuration for the provisioner daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Where the state snapshot is persisted. `None` keeps state in memory only.
    pub state_file: Option<PathBuf>,

    /// How long shutdown waits for background tasks before forcing cleanup
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,

    pub radio: RadioConfig,
    pub ap: ApConfig,
    pub connection: ConnectionConfig,
    pub probe: ProbeConfig,
    pub recovery: RecoveryConfig,
    pub tunnel: TunnelConfig,
    pub sessions: SessionConfig,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            state_file: Some(super::default_state_path()),
            shutdown_timeout: Duration::from_secs(10),
            radio: RadioConfig::default(),
            ap: ApConfig::default(),
            connection: ConnectionConfig::default(),
            probe: ProbeConfig::default(),
            recovery: RecoveryConfig::default(),
            tunnel: TunnelConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

impl ProvisionerConfig {
    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8..=63).contains(&self.ap.password_length) {
            return Err(ConfigError::Invalid(format!(
                "ap.password_length must be 8-63 (got {})",
                self.ap.password_length
            )));
        }
        if self.ap.ssid.is_empty() || self.ap.ssid.len() > 32 {
            return Err(ConfigError::Invalid("ap.ssid must be 1-32 bytes".to_string()));
        }
        let backoff = &self.recovery.backoff;
        if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "recovery.backoff.multiplier must be a finite number >= 1.0 (got {})",
                backoff.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&backoff.jitter) {
            return Err(ConfigError::Invalid(format!(
                "recovery.backoff.jitter must be within 0.0-1.0 (got {})",
                backoff.jitter
            )));
        }
        if self.recovery.backoff.initial > self.recovery.backoff.max {
            return Err(ConfigError::Invalid(
                "recovery.backoff.initial must not exceed recovery.backoff.max".to_string(),
            ));
        }
        if self.probe.endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "probe.endpoints must list at least one endpoint".to_string(),
            ));
        }
        self.tunnel.validate()
    }
}

/// Radio driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Wireless interface. Auto-detected when unset.
    pub interface: Option<String>,

    /// Path to the nmcli binary
    pub nmcli_path: PathBuf,

    /// Directory holding saved connection profiles
    pub profile_dir: PathBuf,

    /// Timeout for a single driver command
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            interface: None,
            nmcli_path: PathBuf::from("nmcli"),
            profile_dir: PathBuf::from("/etc/NetworkManager/system-connections"),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Setup access point settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApConfig {
    /// Name of the AP connection profile
    pub profile_name: String,

    /// Broadcast SSID of the setup network
    pub ssid: String,

    /// Gateway address with prefix
    pub ip: String,

    pub channel: u8,

    /// How long a generated AP password is reused
    #[serde(with = "duration_secs")]
    pub password_ttl: Duration,

    /// Length of generated AP passwords
    pub password_length: usize,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            profile_name: "wp-setup-ap".to_string(),
            ssid: "Device-Setup".to_string(),
            ip: "192.168.4.1/24".to_string(),
            channel: 6,
            password_ttl: Duration::from_secs(24 * 60 * 60),
            password_length: 12,
        }
    }
}

/// Client connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Wait after activation before re-verifying the link
    #[serde(with = "duration_millis")]
    pub settle_time: Duration,

    /// Timeout for link status queries
    #[serde(with = "duration_secs")]
    pub status_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            settle_time: Duration::from_millis(3000),
            status_timeout: Duration::from_secs(10),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    #[serde(default)]
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(3),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

/// Automatic reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub backoff: BackoffConfig,

    /// Failed attempts before giving up and returning to AP mode
    pub max_retries: u32,

    /// How often a detected captive portal is re-probed
    #[serde(with = "duration_secs")]
    pub portal_recheck_interval: Duration,

    /// How long a portal detection is trusted before it must be re-detected
    #[serde(with = "duration_secs")]
    pub portal_session_ttl: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_retries: 5,
            portal_recheck_interval: Duration::from_secs(30),
            portal_session_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Companion-UI session bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions not seen for this long are removed
    #[serde(with = "duration_secs")]
    pub max_age: Duration,

    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}
