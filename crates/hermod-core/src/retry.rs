use std::time::Duration;

/// Backoff policy applied to consecutive connection/timeout failures.
///
/// The first two timeouts retry immediately; from the third onward the wait
/// grows exponentially up to a cap. Rate-limit waits are not computed here:
/// the server dictates those verbatim.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    backoff_factor_ms: u64,
    max_wait_ms: u64,
}

impl BackoffPolicy {
    pub fn new(backoff_factor_ms: u64, max_wait_ms: u64) -> Self {
        Self {
            backoff_factor_ms,
            max_wait_ms,
        }
    }

    pub fn backoff_factor_ms(&self) -> u64 {
        self.backoff_factor_ms
    }

    pub fn max_wait_ms(&self) -> u64 {
        self.max_wait_ms
    }

    /// Wait before retrying after the `num_timeouts`th consecutive timeout.
    pub fn wait_for_timeout(&self, num_timeouts: u32) -> Duration {
        if num_timeouts <= 2 {
            return Duration::ZERO;
        }

        let shift = (num_timeouts - 1).min(20);
        let multiplier = 1_u64 << shift;
        let wait = self
            .backoff_factor_ms
            .saturating_mul(multiplier)
            .min(self.max_wait_ms);
        Duration::from_millis(wait)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(100, 3_600_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_two_timeouts_retry_immediately() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.wait_for_timeout(1), Duration::ZERO);
        assert_eq!(policy.wait_for_timeout(2), Duration::ZERO);
    }

    #[test]
    fn scales_exponentially_from_third_timeout() {
        let policy = BackoffPolicy::new(100, 3_600_000);
        assert_eq!(policy.wait_for_timeout(3), Duration::from_millis(400));
        assert_eq!(policy.wait_for_timeout(4), Duration::from_millis(800));
        assert_eq!(policy.wait_for_timeout(6), Duration::from_millis(3_200));
    }

    #[test]
    fn caps_wait_at_max() {
        let policy = BackoffPolicy::new(1_000, 4_000);
        assert_eq!(policy.wait_for_timeout(10), Duration::from_millis(4_000));
    }

    #[test]
    fn shift_saturates_for_pathological_counts() {
        let policy = BackoffPolicy::new(1, u64::MAX);
        assert_eq!(
            policy.wait_for_timeout(200),
            Duration::from_millis(1 << 20)
        );
    }
}
