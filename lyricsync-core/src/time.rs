//! Time and duration conversion utilities.
//!
//! Playback positions travel through the engine as integer milliseconds.
//! These helpers convert at the edges with explicit saturation instead of
//! `as` casts.

use std::time::{Duration, Instant};

/// Extension trait for saturating Duration conversions.
pub trait DurationExt {
    /// Convert duration to milliseconds as u64, saturating at `u64::MAX`.
    fn as_millis_u64(&self) -> u64;

    /// Convert duration to milliseconds as i64, saturating at `i64::MAX`.
    ///
    /// Useful for database storage and signed position arithmetic.
    fn as_millis_i64(&self) -> i64;

    /// Convert duration to seconds as u32, saturating at `u32::MAX`.
    fn as_secs_u32(&self) -> u32;
}

impl DurationExt for Duration {
    fn as_millis_u64(&self) -> u64 {
        u64::try_from(self.as_millis()).unwrap_or(u64::MAX)
    }

    fn as_millis_i64(&self) -> i64 {
        i64::try_from(self.as_millis()).unwrap_or(i64::MAX)
    }

    fn as_secs_u32(&self) -> u32 {
        u32::try_from(self.as_secs()).unwrap_or(u32::MAX)
    }
}

/// Milliseconds elapsed from `earlier` to `now`, zero if `now` precedes it.
#[must_use]
pub fn millis_since(now: Instant, earlier: Instant) -> u64 {
    now.saturating_duration_since(earlier).as_millis_u64()
}

/// Convert an unsigned millisecond value to signed, saturating at `i64::MAX`.
#[must_use]
pub fn ms_to_i64(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// Clamp a signed millisecond value into `u64`, mapping negatives to zero.
#[must_use]
pub fn ms_to_u64(ms: i64) -> u64 {
    u64::try_from(ms).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_millis_u64() {
        let duration = Duration::from_millis(1234);
        assert_eq!(duration.as_millis_u64(), 1234);
    }

    #[test]
    fn test_as_millis_i64() {
        let duration = Duration::from_millis(5000);
        assert_eq!(duration.as_millis_i64(), 5000);
    }

    #[test]
    fn test_as_secs_u32_large() {
        let duration = Duration::from_secs(u64::from(u32::MAX) + 1);
        assert_eq!(duration.as_secs_u32(), u32::MAX);
    }

    #[test]
    fn test_millis_since_saturates() {
        let earlier = Instant::now();
        let later = earlier + Duration::from_millis(250);
        assert_eq!(millis_since(later, earlier), 250);
        assert_eq!(millis_since(earlier, later), 0);
    }

    #[test]
    fn test_signed_conversions() {
        assert_eq!(ms_to_i64(42), 42);
        assert_eq!(ms_to_i64(u64::MAX), i64::MAX);
        assert_eq!(ms_to_u64(-5), 0);
        assert_eq!(ms_to_u64(7), 7);
    }
}
