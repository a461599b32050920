//! Retry decisions with exponential backoff and jitter.
//!
//! Transient failures (throttling, 5xx, network faults) are retried with
//! `min(cap, base * 2^attempt) + jitter`. Authentication, invalid-request and
//! cancellation failures are never retried. The policy is stateless; the
//! attempt counter lives in the caller's loop.

use rand::Rng;
use std::time::Duration;

use crate::error::ClassifiedError;

/// Base delay for the first retry.
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound (exclusive) on the random addition to each delay.
pub const JITTER_CEILING: Duration = Duration::from_secs(1);

/// Upper bound on the exponential part of the delay.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    /// Surface the error to the caller.
    Stop,
}

/// Exponential backoff policy with additive jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
            jitter_ceiling: JITTER_CEILING,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter, mostly useful for tests.
    pub fn without_jitter() -> Self {
        Self {
            jitter_ceiling: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Decide what to do after a failure.
    ///
    /// `attempt` is 0 for the decision following the first failed call, so
    /// at most `max_retries + 1` calls are made.
    pub fn decide(
        &self,
        attempt: u32,
        error: &ClassifiedError,
        max_retries: u32,
    ) -> RetryDecision {
        if attempt >= max_retries {
            return RetryDecision::Stop;
        }
        if error.kind().is_fatal() || !error.is_retryable() {
            return RetryDecision::Stop;
        }
        RetryDecision::Retry(self.backoff(attempt) + self.jitter())
    }

    /// The deterministic part of the delay for `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        // 2^31 seconds is far past any sane cap, so clamp the shift there.
        let factor = 1u32 << attempt.min(31);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ceiling.is_zero() {
            return Duration::ZERO;
        }
        rand::thread_rng().gen_range(Duration::ZERO..self.jitter_ceiling)
    }
}

/// [`RetryPolicy::decide`] with the default policy.
pub fn decide(attempt: u32, error: &ClassifiedError, max_retries: u32) -> RetryDecision {
    RetryPolicy::default().decide(attempt, error, max_retries)
}
