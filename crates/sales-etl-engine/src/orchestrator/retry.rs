//! Bounded retry with backoff for failed tasks.

use std::time::Duration;

use sales_etl_types::StageError;

use crate::config::types::{BackoffConfig, RetryConfig};

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt-1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

/// How many times a task may run and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        let backoff = match config.backoff {
            BackoffConfig::Fixed { delay_secs } => Backoff::Fixed(Duration::from_secs(delay_secs)),
            BackoffConfig::Exponential {
                base_secs,
                max_secs,
            } => Backoff::Exponential {
                base: Duration::from_secs(base_secs),
                max: Duration::from_secs(max_secs),
            },
        };
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff,
        }
    }

    /// Run once, never retry.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    /// Whether a failure on `attempt` (1-based) earns another attempt.
    #[must_use]
    pub fn should_retry(&self, err: &StageError, attempt: u32) -> bool {
        err.retryable && attempt < self.max_attempts
    }

    /// Wait before the attempt following `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_daily_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.delay_after(1), Duration::from_secs(300));
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(5),
            },
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(64), Duration::from_secs(5));
    }

    #[test]
    fn only_retryable_errors_within_budget() {
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: Backoff::Fixed(Duration::ZERO),
        };
        let transient = StageError::connection("CONNECTION_FAILED", "refused");
        let permanent = StageError::format("MALFORMED_FILE", "bad row");
        assert!(policy.should_retry(&transient, 1));
        assert!(!policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&permanent, 1));
        assert!(!RetryPolicy::no_retry().should_retry(&transient, 1));
    }

    #[test]
    fn zero_attempts_config_still_runs_once() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 0,
            backoff: BackoffConfig::Fixed { delay_secs: 1 },
        });
        assert_eq!(policy.max_attempts, 1);
    }
}
