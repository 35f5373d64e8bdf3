//! Driver error classification
//!
//! An ordered table of lowercase substrings. The first match wins; anything
//! unmatched is [`FailureKind::Unknown`] carrying the truncated raw text.

use wp_core::{DriverError, FailureKind};

const PATTERNS: &[(&str, FailureKind)] = &[
    ("secrets were required", FailureKind::IncorrectPassword),
    ("no secrets", FailureKind::IncorrectPassword),
    ("802-1x supplicant", FailureKind::IncorrectPassword),
    ("4-way handshake", FailureKind::IncorrectPassword),
    ("authentication", FailureKind::IncorrectPassword),
    ("no network with ssid", FailureKind::NetworkNotFound),
    ("not found", FailureKind::NetworkNotFound),
    ("ip configuration could not be reserved", FailureKind::DhcpTimeout),
    ("ip configuration", FailureKind::DhcpTimeout),
    ("dhcp", FailureKind::DhcpTimeout),
    ("timeout", FailureKind::ActivationTimeout),
    ("timed out", FailureKind::ActivationTimeout),
    ("device not ready", FailureKind::DeviceUnavailable),
    ("unavailable", FailureKind::DeviceUnavailable),
    ("no wi-fi device", FailureKind::DeviceUnavailable),
    ("no wireless device", FailureKind::DeviceUnavailable),
];

/// Classify raw driver text
pub fn classify_message(raw: &str) -> FailureKind {
    let lower = raw.to_lowercase();
    PATTERNS
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, kind)| kind.clone())
        .unwrap_or_else(|| FailureKind::unknown(raw))
}

/// Classify a driver error
pub fn classify(err: &DriverError) -> FailureKind {
    match err {
        DriverError::Timeout { .. } => FailureKind::ActivationTimeout,
        DriverError::NoDevice => FailureKind::DeviceUnavailable,
        other => classify_message(&other.message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_messages() {
        assert_eq!(
            classify_message("Error: Connection activation failed: Secrets were required, but not provided."),
            FailureKind::IncorrectPassword
        );
        assert_eq!(
            classify_message("Error: No network with SSID 'Home' found."),
            FailureKind::NetworkNotFound
        );
        assert_eq!(
            classify_message("Error: Connection activation failed: IP configuration could not be reserved"),
            FailureKind::DhcpTimeout
        );
        assert_eq!(
            classify_message("Error: Timeout expired (90 seconds)"),
            FailureKind::ActivationTimeout
        );
        assert_eq!(
            classify_message("Error: Device 'wlan0' not ready (unavailable)"),
            FailureKind::DeviceUnavailable
        );
    }

    #[test]
    fn test_order_decides_overlaps() {
        // Mentions both secrets and a timeout; the credential pattern comes first
        assert_eq!(
            classify_message("no secrets provided before timeout"),
            FailureKind::IncorrectPassword
        );
    }

    #[test]
    fn test_unmatched_is_unknown() {
        assert_eq!(
            classify_message("something odd happened"),
            FailureKind::Unknown("something odd happened".to_string())
        );
    }

    #[test]
    fn test_error_variants() {
        let timeout = DriverError::Timeout {
            verb: "activate",
            secs: 30,
        };
        assert_eq!(classify(&timeout), FailureKind::ActivationTimeout);
        assert_eq!(classify(&DriverError::NoDevice), FailureKind::DeviceUnavailable);
    }
}
