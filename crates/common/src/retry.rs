//! Retry configuration with exponential backoff.

use std::time::Duration;

use crate::config::SyncSettings;

/// Bounded retry policy.
///
/// `max_attempts` counts every call including the first, so a policy of 5
/// attempts sleeps at most 4 times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total number of attempts.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl From<&SyncSettings> for RetryConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.fetch_max_attempts,
            initial_delay: settings.initial_backoff(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Whether another attempt may follow the given failed attempt (0-indexed).
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Sum of every delay the policy can incur before giving up.
    #[must_use]
    pub fn worst_case_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}
