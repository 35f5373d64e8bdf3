//! Time utilities for wifi-provisioner
//!
//! All persisted timestamps are Unix milliseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch, which happens on
/// boards without an RTC before NTP has synced.
///
/// # Examples
/// ```
/// use wp_core::time::current_time_millis;
///
/// let now = current_time_millis();
/// assert!(now > 0);
/// ```
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Calculate elapsed time in milliseconds since a given timestamp.
///
/// Returns 0 if the given time is in the future.
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

/// Whether `since` is older than `max_age` relative to `now`.
pub fn is_expired(since: u64, max_age: Duration, now: u64) -> bool {
    now.saturating_sub(since) >= max_age.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_millis_is_positive() {
        assert!(current_time_millis() > 0);
    }

    #[test]
    fn test_elapsed_millis_future_time() {
        let future = current_time_millis() + 1_000_000;
        assert_eq!(elapsed_millis(future), 0);
    }

    #[test]
    fn test_is_expired() {
        let ttl = Duration::from_secs(60);
        assert!(!is_expired(1_000, ttl, 1_000 + 59_999));
        assert!(is_expired(1_000, ttl, 1_000 + 60_000));
        // Clock went backwards
        assert!(!is_expired(5_000, ttl, 1_000));
    }
}
