//! Exponential backoff with jitter, shared by action retries and gateway
//! reconnects.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the random extra delay, as a fraction of the capped delay.
    pub jitter: f64,
}

impl ExponentialBackoff {
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: 0.25,
        }
    }

    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped, plus up to `jitter` of that.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let capped = self.base.saturating_mul(factor).min(self.cap);
        if self.jitter <= 0.0 || capped.is_zero() {
            return capped;
        }
        let extra = rand::rng().random_range(0.0..=self.jitter);
        capped + capped.mul_f64(extra)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(0, 500)]
    #[case(1, 1000)]
    #[case(3, 4000)]
    #[case(6, 30000)]
    #[case(200, 30000)]
    fn doubles_until_cap(#[case] attempt: u32, #[case] expected_ms: u64) {
        let backoff = ExponentialBackoff::default().without_jitter();
        assert_eq!(backoff.delay(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        for _ in 0..100 {
            let d = backoff.delay(2);
            assert!(d >= Duration::from_millis(400));
            assert!(d <= Duration::from_millis(500));
        }
    }
}
