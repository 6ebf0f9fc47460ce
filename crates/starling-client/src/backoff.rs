//! Reconnect schedule — exponential backoff with jitter.
//!
//! Delays double from the base up to the cap, plus up to one second of
//! uniform jitter so a fleet of clients does not redial in lockstep. The
//! attempt budget applies per outage; reaching `Ready` refunds it.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// First retry delay. Doubles each attempt.
    pub base: Duration,
    /// Upper bound on the exponential part.
    pub cap: Duration,
    /// Uniform jitter added on top, up to this much.
    pub max_jitter: Duration,
    /// Attempts allowed before the client parks in `Failed`.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            max_jitter: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (0-based).
    pub fn delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exp = self
            .base
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .min(self.cap);
        let jitter_ms = if self.max_jitter.is_zero() {
            0
        } else {
            rng.gen_range(0..=self.max_jitter.as_millis() as u64)
        };
        exp + Duration::from_millis(jitter_ms)
    }

    /// True once the attempt budget is spent.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn delays_double_from_the_base() {
        let policy = ReconnectPolicy { max_jitter: Duration::ZERO, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(policy.delay(0, &mut rng), Duration::from_secs(1));
        assert_eq!(policy.delay(1, &mut rng), Duration::from_secs(2));
        assert_eq!(policy.delay(2, &mut rng), Duration::from_secs(4));
        assert_eq!(policy.delay(5, &mut rng), Duration::from_secs(32));
    }

    #[test]
    fn delays_cap_at_sixty_seconds() {
        let policy = ReconnectPolicy { max_jitter: Duration::ZERO, ..Default::default() };
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(policy.delay(6, &mut rng), Duration::from_secs(60));
        assert_eq!(policy.delay(30, &mut rng), Duration::from_secs(60));
        // Shift overflow must not wrap back to small delays.
        assert_eq!(policy.delay(40, &mut rng), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_a_second() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);

        for attempt in 0..8 {
            let d = policy.delay(attempt, &mut rng);
            let floor = policy
                .base
                .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
                .min(policy.cap);
            assert!(d >= floor);
            assert!(d <= floor + Duration::from_secs(1));
        }
    }

    #[test]
    fn budget_is_five_attempts() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
    }
}
