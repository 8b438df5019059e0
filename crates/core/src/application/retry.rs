// Retry & Backoff Controller
use crate::domain::{ErrorKind, JobOptions, ReviewReason};
use std::time::Duration;

/// Retry decision result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to pending after `delay`
    Retry { retry_count: u32, delay: Duration },
    /// Terminalize as `needs_review` and open a review item
    Escalate {
        retry_count: u32,
        reason: ReviewReason,
    },
    /// Terminalize as `failed`
    Fail { retry_count: u32 },
}

impl RetryDecision {
    pub fn retry_count(&self) -> u32 {
        match self {
            RetryDecision::Retry { retry_count, .. }
            | RetryDecision::Escalate { retry_count, .. }
            | RetryDecision::Fail { retry_count } => *retry_count,
        }
    }
}

/// Per-job retry policy
///
/// Backoff formula:
/// ```text
/// delay(n) = retry_delay                          (exponential_backoff = false)
/// delay(n) = min(retry_delay * 2^(n-1), ceiling)  (exponential_backoff = true)
/// ceiling  = max(max_backoff, retry_delay)
/// ```
/// No jitter: delays are deterministic so schedules are reproducible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    exponential: bool,
    max_retries: u32,
    send_to_review: bool,
    max_backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy from a job's options
    ///
    /// # Arguments
    /// * `options` - Validated job options
    /// * `max_backoff` - Engine-wide ceiling for exponential delays
    pub fn from_options(options: &JobOptions, max_backoff: Duration) -> Self {
        Self {
            base_delay: options.retry_delay(),
            exponential: options.exponential_backoff,
            max_retries: options.max_retries.max(1),
            send_to_review: options.send_to_review_after_max_retries,
            max_backoff,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry_count` (1-based)
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let exponent = retry_count.saturating_sub(1).min(31);
        let ceiling = self.max_backoff.max(self.base_delay);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(ceiling, |d| d.min(ceiling))
    }

    /// Decide what happens after a failed attempt
    ///
    /// `previous_retries` is the document's `retry_count` before this attempt.
    /// The returned count never exceeds `max_retries`.
    pub fn decide(&self, previous_retries: u32, error_kind: ErrorKind) -> RetryDecision {
        let retry_count = previous_retries.saturating_add(1).min(self.max_retries);

        let reason = if error_kind == ErrorKind::Terminal {
            ReviewReason::TerminalError
        } else if retry_count < self.max_retries {
            return RetryDecision::Retry {
                retry_count,
                delay: self.delay_for(retry_count),
            };
        } else {
            ReviewReason::MaxRetriesExceeded
        };

        if self.send_to_review {
            RetryDecision::Escalate {
                retry_count,
                reason,
            }
        } else {
            RetryDecision::Fail { retry_count }
        }
    }
}
