//! Linear backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Delay before the attempt that follows attempt number `attempt`.
///
/// Grows as `attempt * base_ms`, capped at `max_ms`, plus up to 10% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let delay_ms = base_ms.saturating_mul(attempt as u64);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let b1 = calculate_backoff(1, 1000, 10_000);
        assert!(b1.as_millis() >= 1000 && b1.as_millis() < 1100);

        let b2 = calculate_backoff(2, 1000, 10_000);
        assert!(b2.as_millis() >= 2000);
        assert!(b2 > b1);

        let max = calculate_backoff(50, 1000, 5000);
        assert!(max.as_millis() >= 5000 && max.as_millis() < 5500);
    }

    #[test]
    fn test_zero_attempt_has_no_delay() {
        assert_eq!(calculate_backoff(0, 1000, 10_000), Duration::ZERO);
    }
}
