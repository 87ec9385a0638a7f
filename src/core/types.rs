//! Common types used across control plane modules.

use std::time::Duration;

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Region identifier, e.g. `us-east-1`.
pub type RegionId = String;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Milliseconds elapsed between `earlier` and `later`, floored at zero.
pub fn millis_between(earlier: Timestamp, later: Timestamp) -> u64 {
    (later - earlier).num_milliseconds().max(0) as u64
}

/// Convert a millisecond setting into a [`Duration`].
pub fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_between() {
        let start = now();
        let later = start + chrono::Duration::milliseconds(1500);
        assert_eq!(millis_between(start, later), 1500);
        // Clock going backwards floors at zero
        assert_eq!(millis_between(later, start), 0);
    }

    #[test]
    fn test_ms() {
        assert_eq!(ms(250), Duration::from_millis(250));
    }
}
