//! Setup AP password
//!
//! The password is shown to the user (QR code, display). It is kept across
//! transient failures and only rotated once it has outlived its TTL.

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

use wp_core::time::is_expired;
use wp_core::SystemState;

/// Generate a random alphanumeric password
pub fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Password chosen for the next AP session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApPassword {
    pub password: String,
    pub generated_at: u64,
    /// Whether the password was generated just now
    pub fresh: bool,
}

/// Reuse the stored password while younger than `ttl`, otherwise generate one
pub fn ap_password_for(state: &SystemState, ttl: Duration, length: usize, now: u64) -> ApPassword {
    match (&state.ap_password, state.ap_password_generated_at) {
        (Some(password), Some(generated_at)) if !is_expired(generated_at, ttl, now) => ApPassword {
            password: password.clone(),
            generated_at,
            fresh: false,
        },
        _ => ApPassword {
            password: generate_password(length),
            generated_at: now,
            fresh: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn test_generate_password() {
        let password = generate_password(12);
        assert_eq!(password.len(), 12);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_reuses_within_ttl() {
        let state = SystemState {
            ap_password: Some("abcdefgh1234".to_string()),
            ap_password_generated_at: Some(1_000),
            ..SystemState::default()
        };
        let chosen = ap_password_for(&state, TTL, 12, 1_000 + 60_000);
        assert_eq!(chosen.password, "abcdefgh1234");
        assert_eq!(chosen.generated_at, 1_000);
        assert!(!chosen.fresh);
    }

    #[test]
    fn test_regenerates_after_ttl() {
        let state = SystemState {
            ap_password: Some("abcdefgh1234".to_string()),
            ap_password_generated_at: Some(1_000),
            ..SystemState::default()
        };
        let now = 1_000 + TTL.as_millis() as u64;
        let chosen = ap_password_for(&state, TTL, 12, now);
        assert!(chosen.fresh);
        assert_eq!(chosen.generated_at, now);
    }

    #[test]
    fn test_generates_when_missing() {
        let chosen = ap_password_for(&SystemState::default(), TTL, 16, 5);
        assert!(chosen.fresh);
        assert_eq!(chosen.password.len(), 16);
    }
}
