//! Time utilities and name type aliases.
//!
//! - Timestamps are milliseconds since the Unix epoch, stored as INTEGER
//! - CompactString: inline up to 24 chars (zero heap allocation)

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use compact_str::CompactString;

pub type QueueName = CompactString;

/// Get current timestamp in milliseconds.
#[inline(always)]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Absolute expiry for a relative ttl, as stored in an INTEGER column.
///
/// Saturates at `i64::MAX` instead of wrapping into the past.
#[inline]
pub fn expire_at(now: u64, ttl: Duration) -> i64 {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    i64::try_from(now.saturating_add(ttl_ms)).unwrap_or(i64::MAX)
}

/// Create a CompactString from a queue name (zero allocation for names <= 24 chars)
#[inline(always)]
pub fn queue_name(s: &str) -> QueueName {
    CompactString::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expire_at_adds_ttl() {
        assert_eq!(expire_at(1_000, Duration::from_secs(2)), 3_000);
        assert_eq!(expire_at(1_000, Duration::ZERO), 1_000);
    }

    #[test]
    fn test_expire_at_saturates() {
        assert_eq!(expire_at(u64::MAX - 1, Duration::from_secs(60)), i64::MAX);
        assert_eq!(expire_at(5, Duration::MAX), i64::MAX);
        assert_eq!(expire_at(i64::MAX as u64, Duration::from_millis(1)), i64::MAX);
    }
}
