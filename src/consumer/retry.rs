//! Retry decisions for the consumer/dispatcher: whether a failed message is
//! republished with backoff, or routed to the dead-letter exchange.

use std::time::Duration;

use crate::errors::PipelineError;

/// What the dispatcher should do after a handler error.
pub enum RetryDecision {
    /// Republish to the same routing key after `delay`, with `retry_count + 1`.
    Republish { delay: Duration, next_retry_count: u32 },
    /// Exhausted or non-retryable: publish a terminal failure and DLQ.
    DeadLetter,
}

/// Governs retry backoff and the retry-count ceiling for task processing.
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, retry_delay_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            retry_delay_ms,
            max_backoff_ms,
        }
    }

    /// Decide what to do given the current `retry_count` (from the
    /// `retry-count` header) and the error that just occurred.
    #[must_use]
    pub fn decide(&self, retry_count: u32, error: &PipelineError) -> RetryDecision {
        if error.is_retryable_at(retry_count) && retry_count < self.max_retries {
            RetryDecision::Republish {
                delay: self.backoff_for(retry_count),
                next_retry_count: retry_count + 1,
            }
        } else {
            RetryDecision::DeadLetter
        }
    }

    /// `retry_delay_ms * 2^attempt`, capped at `max_backoff_ms`.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let backoff_ms = self
            .retry_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_backoff_ms);
        Duration::from_millis(backoff_ms)
    }
}
