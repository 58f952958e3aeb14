//! Time utilities for tether

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in seconds.
///
/// A clock set before the Unix epoch reads as 0.
///
/// # Examples
/// ```
/// use tether_core::time::current_time_secs;
///
/// let now = current_time_secs();
/// assert!(now > 0);
/// ```
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Signed distance in seconds from `timestamp` to `now`.
///
/// Positive when `timestamp` lies in the past.
pub fn skew_secs(now: u64, timestamp: u64) -> i128 {
    i128::from(now) - i128::from(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_secs_is_positive() {
        assert!(current_time_secs() > 0);
    }

    #[test]
    fn test_skew_secs() {
        assert_eq!(skew_secs(100, 70), 30);
        assert_eq!(skew_secs(70, 100), -30);
        assert_eq!(skew_secs(0, u64::MAX), -i128::from(u64::MAX));
    }
}
