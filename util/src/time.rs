//! General time utility functions

use chrono;
use std::time::Duration;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Number of whole periods of `period` which fit into `elapsed`.
///
/// A zero period yields zero.
pub fn whole_periods(elapsed: Duration, period: Duration) -> u64 {
    if period.as_nanos() == 0 {
        return 0;
    }
    (elapsed.as_nanos() / period.as_nanos()) as u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(
            duration_to_seconds(chrono::Duration::milliseconds(1500)),
            Some(1.5)
        );
    }

    #[test]
    fn test_whole_periods() {
        let period = Duration::from_micros(10);
        assert_eq!(whole_periods(Duration::from_micros(0), period), 0);
        assert_eq!(whole_periods(Duration::from_micros(9), period), 0);
        assert_eq!(whole_periods(Duration::from_micros(25), period), 2);
        assert_eq!(whole_periods(Duration::from_secs(1), Duration::from_secs(0)), 0);
    }
}
