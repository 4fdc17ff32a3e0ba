use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff with jitter for the persistence path.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total insert attempts, including the first one
    pub max_attempts: u32,
    /// Base delay doubled per failed attempt
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to each delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `failed_attempts` consecutive failures:
    /// `2^failed_attempts * base_delay + rand(0..max_jitter)`.
    pub fn backoff_delay(&self, failed_attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(failed_attempts.min(16)).unwrap_or(u32::MAX);
        let exponential = self.base_delay.saturating_mul(factor);

        let jitter_millis = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_millis == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_millis))
        };

        exponential + jitter
    }
}
