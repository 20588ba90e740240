//! Retry utilities: configurable exponential backoff.
//!
//! Uses `backon` for exponential backoff with jitter. Publish retries in the
//! relay are driven from a [`RetryConfig`] so deployments can tune them.

use std::time::Duration;

use backon::ExponentialBuilder;
use serde::Deserialize;

/// Backoff settings for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub min_delay_ms: u64,
    /// Cap on any single delay.
    pub max_delay_ms: u64,
    /// Retries after the first attempt.
    pub max_attempts: usize,
    /// Randomize delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 5_000,
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fast, jitter-free settings for tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            min_delay_ms: 1,
            max_delay_ms: 1,
            max_attempts,
            jitter: false,
        }
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms))
    }

    /// Build the backoff policy.
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay())
            .with_max_delay(self.max_delay())
            .with_max_times(self.max_attempts);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}
