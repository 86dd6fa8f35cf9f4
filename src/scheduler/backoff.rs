//! Retry backoff schedule for transient failures.
//!
//! The source system only carried a retry counter; the schedule here is
//! the documented choice: exponential doubling from a configurable base,
//! capped, with ±20% jitter so released tasks do not thunder back in
//! lockstep.

use std::time::Duration;

use rand::RngExt;

/// Jitter applied around the computed delay.
const JITTER_FACTOR: f64 = 0.2;

/// Computes the delay before the given retry attempt.
///
/// `attempt` is 1-based: the first retry waits roughly the base delay,
/// each further retry doubles it, and the result never exceeds the cap
/// (pre-jitter). Jitter spreads the final value across ±20%.
pub fn retry_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let delay = raw_delay(attempt, base, cap);
    apply_jitter(delay, rand::rng().random_range(-JITTER_FACTOR..=JITTER_FACTOR))
}

/// Deterministic delay before jitter.
fn raw_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let factor = 2u32.saturating_pow(exponent);
    base.saturating_mul(factor).min(cap)
}

/// Applies a signed jitter fraction to a delay.
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    delay.mul_f64(1.0 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(30);
    const CAP: Duration = Duration::from_secs(900);

    #[test]
    fn test_raw_delay_doubles() {
        assert_eq!(raw_delay(1, BASE, CAP), Duration::from_secs(30));
        assert_eq!(raw_delay(2, BASE, CAP), Duration::from_secs(60));
        assert_eq!(raw_delay(3, BASE, CAP), Duration::from_secs(120));
        assert_eq!(raw_delay(4, BASE, CAP), Duration::from_secs(240));
        assert_eq!(raw_delay(5, BASE, CAP), Duration::from_secs(480));
    }

    #[test]
    fn test_raw_delay_caps() {
        assert_eq!(raw_delay(6, BASE, CAP), CAP);
        assert_eq!(raw_delay(30, BASE, CAP), CAP);
        assert_eq!(raw_delay(u32::MAX, BASE, CAP), CAP);
    }

    #[test]
    fn test_zero_attempt_behaves_like_first() {
        assert_eq!(raw_delay(0, BASE, CAP), raw_delay(1, BASE, CAP));
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_secs(100);

        assert_eq!(apply_jitter(delay, 0.2), Duration::from_secs(120));
        assert_eq!(apply_jitter(delay, -0.2), Duration::from_secs(80));
        assert_eq!(apply_jitter(delay, 0.0), delay);
    }

    #[test]
    fn test_retry_delay_stays_within_jitter_band() {
        for attempt in 1..=10 {
            let expected = raw_delay(attempt, BASE, CAP);
            let lower = expected.mul_f64(1.0 - JITTER_FACTOR);
            let upper = expected.mul_f64(1.0 + JITTER_FACTOR);

            for _ in 0..20 {
                let delay = retry_delay(attempt, BASE, CAP);
                assert!(delay >= lower, "attempt {} produced {:?}", attempt, delay);
                assert!(delay <= upper, "attempt {} produced {:?}", attempt, delay);
            }
        }
    }
}
