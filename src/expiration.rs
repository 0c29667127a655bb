//! Conversion of caller expirations into memcached expirations.
//!
//! Callers always pass the number of seconds an item should live, with 0
//! meaning "never expire". Memcached overloads the same field: values up to
//! thirty days are relative seconds, anything larger is read as an absolute
//! Unix timestamp. Long relative expirations therefore have to be turned
//! into timestamps before they reach the backend.

use std::time::{SystemTime, UNIX_EPOCH};

/// Largest expiration memcached treats as relative (30 days).
pub const MAX_RELATIVE_EXPIRATION: i64 = 60 * 60 * 24 * 30;

/// Normalize an expiration against the current clock.
pub fn normalize(expire: i64) -> i64 {
    normalize_at(expire, unix_now())
}

/// Normalize an expiration against an explicit "now" (Unix seconds).
///
/// ```
/// use objcache::expiration::normalize_at;
///
/// assert_eq!(normalize_at(600, 1_700_000_000), 600);
/// assert_eq!(normalize_at(2_592_001, 1_700_000_000), 1_702_592_001);
/// ```
pub fn normalize_at(expire: i64, now: i64) -> i64 {
    if expire <= MAX_RELATIVE_EXPIRATION {
        return expire;
    }
    expire.saturating_add(now)
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn test_boundary() {
        let now = 1_700_000_000;
        assert_eq!(normalize_at(0, now), 0);
        assert_eq!(normalize_at(2_592_000, now), 2_592_000);
        assert_eq!(normalize_at(2_592_001, now), 2_592_001 + now);
    }

    #[test]
    fn test_negative_passes_through() {
        assert_eq!(normalize_at(-1, 1_700_000_000), -1);
    }

    #[test]
    fn test_normalize_uses_clock() {
        let before = unix_now();
        let result = normalize(MAX_RELATIVE_EXPIRATION + 10);
        let after = unix_now();
        assert!(result >= before + MAX_RELATIVE_EXPIRATION + 10);
        assert!(result <= after + MAX_RELATIVE_EXPIRATION + 10);
    }

    quickcheck! {
        fn prop_relative_values_unchanged(expire: u32, now: u32) -> bool {
            let expire = i64::from(expire) % (MAX_RELATIVE_EXPIRATION + 1);
            normalize_at(expire, i64::from(now)) == expire
        }

        fn prop_long_values_become_absolute(extra: u32, now: u32) -> bool {
            let expire = MAX_RELATIVE_EXPIRATION + 1 + i64::from(extra);
            normalize_at(expire, i64::from(now)) == expire + i64::from(now)
        }
    }
}
