//! Credential and saved-profile validation
//!
//! Input is rejected, never sanitized. Validation runs before any driver
//! call, so a rejected request leaves the radio untouched.

use wp_core::traits::ProfileInspection;
use wp_core::ValidationError;

const PASSWORD_FORBIDDEN: &[char] = &['`', '$', '\\', '"', '\'', ';', '&', '|', '>', '<', '\n', '\r'];

/// Tokens that have no business in a connection profile
const SUSPICIOUS_TOKENS: &[&str] = &[
    "$(", "`", "&&", "||", "; rm", "/bin/sh", "/bin/bash", "curl ", "wget ",
];

/// SSID must be 1-32 characters of `[A-Za-z0-9 _.-]`
pub fn validate_ssid(ssid: &str) -> Result<(), ValidationError> {
    let len = ssid.chars().count();
    if !(1..=32).contains(&len) {
        return Err(ValidationError::SsidLength(len));
    }
    match ssid
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-')))
    {
        Some(c) => Err(ValidationError::SsidCharacter(c)),
        None => Ok(()),
    }
}

/// Password, when present, must be 8-63 characters without shell metacharacters
pub fn validate_password(password: Option<&str>) -> Result<(), ValidationError> {
    let Some(password) = password else {
        return Ok(());
    };
    let len = password.chars().count();
    if !(8..=63).contains(&len) {
        return Err(ValidationError::PasswordLength(len));
    }
    match password.chars().find(|c| PASSWORD_FORBIDDEN.contains(c)) {
        Some(c) => Err(ValidationError::PasswordCharacter(c)),
        None => Ok(()),
    }
}

/// Why a saved profile is not trusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileProblem {
    NotRootOwned(u32),
    Permissive(u32),
    SuspiciousContent(&'static str),
}

impl std::fmt::Display for ProfileProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileProblem::NotRootOwned(uid) => write!(f, "owned by uid {}", uid),
            ProfileProblem::Permissive(mode) => write!(f, "mode {:o} grants group/other access", mode),
            ProfileProblem::SuspiciousContent(token) => write!(f, "contains {:?}", token),
        }
    }
}

/// Check a saved profile before it is reused: owned by root, no group/other
/// permission bits, no command-injection tokens
pub fn check_profile(inspection: &ProfileInspection) -> Result<(), ProfileProblem> {
    if inspection.owner_uid != 0 {
        return Err(ProfileProblem::NotRootOwned(inspection.owner_uid));
    }
    if inspection.mode & 0o077 != 0 {
        return Err(ProfileProblem::Permissive(inspection.mode));
    }
    if let Some(token) = SUSPICIOUS_TOKENS
        .iter()
        .find(|t| inspection.contents.contains(**t))
    {
        return Err(ProfileProblem::SuspiciousContent(token));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ssids() {
        assert!(validate_ssid("Home Wifi").is_ok());
        assert!(validate_ssid("cafe_5G.guest-2").is_ok());
        assert!(validate_ssid(&"a".repeat(32)).is_ok());
    }

    #[test]
    fn test_invalid_ssids() {
        assert_eq!(validate_ssid(""), Err(ValidationError::SsidLength(0)));
        assert_eq!(validate_ssid(&"a".repeat(33)), Err(ValidationError::SsidLength(33)));
        assert_eq!(validate_ssid("Home;Wifi"), Err(ValidationError::SsidCharacter(';')));
        assert_eq!(validate_ssid("Café"), Err(ValidationError::SsidCharacter('é')));
    }

    #[test]
    fn test_passwords() {
        assert!(validate_password(None).is_ok());
        assert!(validate_password(Some("correct horse")).is_ok());
        assert_eq!(validate_password(Some("short")), Err(ValidationError::PasswordLength(5)));
        assert_eq!(
            validate_password(Some(&"p".repeat(64))),
            Err(ValidationError::PasswordLength(64))
        );
        assert_eq!(
            validate_password(Some("hunter2!$x")),
            Err(ValidationError::PasswordCharacter('$'))
        );
        assert_eq!(
            validate_password(Some("line\nbreak")),
            Err(ValidationError::PasswordCharacter('\n'))
        );
    }

    fn inspection(uid: u32, mode: u32, contents: &str) -> ProfileInspection {
        ProfileInspection {
            owner_uid: uid,
            mode,
            contents: contents.to_string(),
        }
    }

    #[test]
    fn test_check_profile() {
        assert!(check_profile(&inspection(0, 0o600, "[wifi]\nssid=Home\n")).is_ok());
        assert_eq!(
            check_profile(&inspection(1000, 0o600, "")),
            Err(ProfileProblem::NotRootOwned(1000))
        );
        assert_eq!(
            check_profile(&inspection(0, 0o644, "")),
            Err(ProfileProblem::Permissive(0o644))
        );
        assert_eq!(
            check_profile(&inspection(0, 0o600, "[connection]\nid=$(reboot)\n")),
            Err(ProfileProblem::SuspiciousContent("$("))
        );
    }
}
