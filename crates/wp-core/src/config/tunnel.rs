//! Reverse tunnel configuration

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the tunnel supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub enabled: bool,

    /// Local HTTP port exposed through the tunnel
    pub local_port: u16,

    pub primary: Option<PrimaryTunnelConfig>,
    pub secondary: Option<SecondaryTunnelConfig>,

    /// How often primary health is re-checked
    #[serde(with = "duration_secs")]
    pub primary_check_interval: Duration,

    /// Spawn attempts before giving up on the secondary
    pub max_attempts: u32,

    /// Delay before the second spawn attempt (doubles up to `max_retry_delay`)
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,

    #[serde(with = "duration_secs")]
    pub max_retry_delay: Duration,

    /// How long a freshly spawned secondary has to print its URL
    #[serde(with = "duration_secs")]
    pub url_timeout: Duration,

    /// How long a terminated child may take to exit before it is killed
    #[serde(with = "duration_secs")]
    pub stop_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_port: 80,
            primary: None,
            secondary: Some(SecondaryTunnelConfig::default()),
            primary_check_interval: Duration::from_secs(60),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(60),
            url_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl TunnelConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "tunnel.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(secondary) = &self.secondary {
            secondary.compile_patterns()?;
        }
        Ok(())
    }
}

/// Tunnel served by a system service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryTunnelConfig {
    /// Provider name published in state
    pub name: String,

    /// Service unit queried through the service manager
    pub service: String,

    /// Public URL served while the service is active
    pub public_url: String,
}

/// Tunnel spawned as a child process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryTunnelConfig {
    /// Provider name published in state
    pub name: String,

    pub program: String,

    /// Arguments; `{port}` is replaced with the local port
    pub args: Vec<String>,

    /// Extra arguments appended when `auth` is set; `{auth}` is replaced
    pub auth_args: Vec<String>,

    pub auth: Option<String>,

    /// Regex patterns matching the public URL in the child's stdout
    pub url_patterns: Vec<String>,

    /// Respawn interval, shorter than the provider's URL lifetime
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,
}

impl Default for SecondaryTunnelConfig {
    fn default() -> Self {
        Self {
            name: "localhost.run".to_string(),
            program: "ssh".to_string(),
            args: vec![
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "-o".to_string(),
                "ServerAliveInterval=30".to_string(),
                "-R".to_string(),
                "80:localhost:{port}".to_string(),
                "nokey@localhost.run".to_string(),
            ],
            auth_args: Vec::new(),
            auth: None,
            url_patterns: vec![
                r"https://[a-z0-9]+\.lhr\.life".to_string(),
                r"https://[a-z0-9-]+\.localhost\.run".to_string(),
            ],
            refresh_interval: Duration::from_secs(50 * 60),
        }
    }
}

impl SecondaryTunnelConfig {
    /// Compile `url_patterns`
    pub fn compile_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        self.url_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| ConfigError::Invalid(format!("Bad URL pattern {:?}: {}", p, e)))
            })
            .collect()
    }
}
