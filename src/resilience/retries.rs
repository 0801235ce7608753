//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether an attempt's outcome is worth retrying
//! - Bound the number of attempts per logical request
//! - Supply the delay before the next attempt
//!
//! # Design Decisions
//! - Transport failures (including timeouts) are always retryable
//! - Responses are retryable only inside the configured status range
//! - Request bodies are buffered by the caller so every attempt resends the same bytes

use std::ops::RangeInclusive;
use std::time::Duration;

use axum::http::StatusCode;

use crate::config::RetryConfig;
use crate::resilience::backoff::BackoffSchedule;

/// Retry policy for forwarded requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffSchedule,
    retryable: RangeInclusive<u16>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffSchedule, retryable: RangeInclusive<u16>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retryable,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            BackoffSchedule::from_millis(&config.backoff_ms),
            config.retryable_status_min..=config.retryable_status_max,
        )
    }

    /// Total attempts per logical request, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable.contains(&status.as_u16())
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt)
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
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert!(policy.is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(policy.is_retryable_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!policy.is_retryable_status(StatusCode::HTTP_VERSION_NOT_SUPPORTED));
        assert!(!policy.is_retryable_status(StatusCode::NOT_FOUND));
        assert!(policy.has_attempts_left(2));
        assert!(!policy.has_attempts_left(3));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::new(0, BackoffSchedule::default(), 500..=599);
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.has_attempts_left(1));
    }
}
