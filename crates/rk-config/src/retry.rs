use std::time::Duration;

use serde::Deserialize;

use crate::types::HumanDuration;

/// Bounded exponential backoff. Used for sink writes (`[retry]`) and for
/// source reconnects (`[source.reconnect]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff: HumanDuration,
    pub max_backoff: HumanDuration,
    /// Total attempts including the first one.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: HumanDuration::from(Duration::from_millis(500)),
            max_backoff: HumanDuration::from(Duration::from_secs(30)),
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based): `initial * 2^(retry-1)`,
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let initial = self.initial_backoff.as_duration();
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        initial
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_backoff.as_duration())
    }
}
