use std::time::Duration;

/// Bounded retry with exponential backoff for optimistic-lock conflicts.
/// The delays only space out re-reads under contention; correctness comes
/// from the store's version check, not from the timing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (0 would never even try)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per subsequent retry
    pub multiplier: u32,
    /// Cap on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy for tests and batch tools that must not sleep long.
    pub fn tight(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-indexed):
    /// base, base*m, base*m^2, ... capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(self.multiplier.saturating_pow(exponent));
        delay.min(self.max_delay)
    }
}
