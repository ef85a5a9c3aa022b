// ABOUTME: Linear retry backoff with a fixed retry budget.
// ABOUTME: Delay grows by one unit per consecutive failed attempt.

use crate::config::TunnelSettings;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, unit: Duration) -> Self {
        Self { max_retries, unit }
    }

    /// Wait before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        self.unit.saturating_mul(failures)
    }

    /// True once `failures` consecutive failures have used up the budget.
    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_retries
    }
}

impl From<&TunnelSettings> for RetryPolicy {
    fn from(settings: &TunnelSettings) -> Self {
        Self::new(settings.max_retries, settings.retry_unit)
    }
}
