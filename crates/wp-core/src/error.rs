//! Core error types for wifi-provisioner

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the wifi-provisioner ecosystem
#[derive(Error, Debug)]
pub enum WpError {
    /// Credential validation error
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Radio driver error
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected user input. Raised before any driver invocation and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// SSID is empty or longer than 32 characters
    #[error("SSID must be 1-32 characters (got {0})")]
    SsidLength(usize),

    /// SSID contains a character outside `[A-Za-z0-9 _.-]`
    #[error("SSID contains invalid character {0:?}")]
    SsidCharacter(char),

    /// Password is shorter than 8 or longer than 63 characters
    #[error("Password must be 8-63 characters (got {0})")]
    PasswordLength(usize),

    /// Password contains a shell metacharacter
    #[error("Password contains forbidden character {0:?}")]
    PasswordCharacter(char),
}

/// Errors returned by a radio driver invocation
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// The driver command ran and reported failure
    #[error("{verb} failed: {message}")]
    Command {
        /// Driver verb that failed (e.g. "activate")
        verb: &'static str,
        /// Raw error text reported by the driver
        message: String,
    },

    /// The driver command did not complete in time
    #[error("{verb} timed out after {secs}s")]
    Timeout {
        /// Driver verb that timed out
        verb: &'static str,
        /// Timeout that elapsed, in seconds
        secs: u64,
    },

    /// The driver binary could not be started
    #[error("Failed to run {program}: {message}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// OS error text
        message: String,
    },

    /// Driver output could not be parsed
    #[error("Unexpected driver output: {0}")]
    Parse(String),

    /// No wireless device is present
    #[error("No wireless device found")]
    NoDevice,
}

impl DriverError {
    /// The raw message used for failure classification
    pub fn message(&self) -> String {
        match self {
            DriverError::Command { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Maximum length of a raw driver message carried in [`FailureKind::Unknown`]
pub const UNKNOWN_MESSAGE_LIMIT: usize = 80;

/// Classified reason a connection attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The network rejected the supplied password
    #[error("Incorrect password")]
    IncorrectPassword,

    /// A saved profile's stored password no longer matches the network
    #[error("Saved credentials are no longer valid")]
    StaleCredential,

    /// The target network is not visible
    #[error("Network out of range")]
    NetworkNotFound,

    /// Association succeeded but no address was obtained
    #[error("DHCP timeout: no IP address assigned")]
    DhcpTimeout,

    /// Activation did not finish in time
    #[error("Connection timed out")]
    ActivationTimeout,

    /// The wireless device is missing or not ready
    #[error("Wireless device unavailable")]
    DeviceUnavailable,

    /// The driver reported success but an independent check disagreed
    #[error("Connection could not be verified: {0}")]
    VerificationFailed(String),

    /// Link is up but the internet is not reachable
    #[error("Connected but no internet access")]
    NoInternet,

    /// Automatic reconnection gave up
    #[error("Lost connection and could not reconnect after {0} attempts")]
    RecoveryExhausted(u32),

    /// Unmatched or ambiguous driver error (truncated raw text)
    #[error("Connection failed: {0}")]
    Unknown(String),
}

impl FailureKind {
    /// Build an [`FailureKind::Unknown`] from raw text, truncated on a char boundary
    pub fn unknown(raw: &str) -> Self {
        let trimmed = raw.trim();
        let truncated: String = trimmed.chars().take(UNKNOWN_MESSAGE_LIMIT).collect();
        FailureKind::Unknown(truncated)
    }

    /// Whether the failure points at bad credentials
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            FailureKind::IncorrectPassword | FailureKind::StaleCredential
        )
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
