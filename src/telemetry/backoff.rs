use std::time::Duration;

use rand::Rng;

use crate::settings::PracticeSettings;

/// Exponential backoff with jitter for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &PracticeSettings) -> Self {
        Self {
            base: Duration::from_millis(settings.retry_base_ms),
            max: Duration::from_millis(settings.retry_max_ms.max(settings.retry_base_ms)),
        }
    }

    /// Delay before the next attempt once `attempts_made` deliveries have
    /// failed: `base * 2^(attempts_made - 1)`, capped at `max`, then jittered
    /// into `[delay / 2, delay]`.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(31);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);

        let millis = delay.as_millis() as u64;
        if millis < 2 {
            return delay;
        }
        let jittered = rand::thread_rng().gen_range(millis / 2..=millis);
        Duration::from_millis(jittered)
    }
}
