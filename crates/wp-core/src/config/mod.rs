//! Configuration management for wifi-provisioner

mod probe;
mod provisioner;
pub mod serde_utils;
mod tunnel;

pub use probe::{ProbeConfig, ProbeEndpoint};
pub use provisioner::{
    ApConfig, BackoffConfig, ConnectionConfig, ProvisionerConfig, RadioConfig, RecoveryConfig,
    SessionConfig,
};
pub use tunnel::{PrimaryTunnelConfig, SecondaryTunnelConfig, TunnelConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wifi-provisioner")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Get the default persisted state path
pub fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wifi-provisioner")
        .join("state.json")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let result: Result<ProvisionerConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_then_load_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ProvisionerConfig::default();
        config.ap.ssid = "Frame-Setup".to_string();
        config.recovery.max_retries = 7;
        save_config(&path, &config).unwrap();

        let loaded: ProvisionerConfig = load_config(&path).unwrap();
        assert_eq!(loaded.ap.ssid, "Frame-Setup");
        assert_eq!(loaded.recovery.max_retries, 7);
        assert_eq!(loaded.probe.endpoints.len(), config.probe.endpoints.len());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[recovery]\nmax_retries = 2\n").unwrap();

        let loaded: ProvisionerConfig = load_config(&path).unwrap();
        assert_eq!(loaded.recovery.max_retries, 2);
        assert_eq!(loaded.ap.profile_name, ApConfig::default().profile_name);
    }
}
