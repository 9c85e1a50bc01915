//! Unified error taxonomy for the task pipeline.
//!
//! Every retry/DLQ decision in the consumer goes through [`PipelineError::kind`]
//! and [`ErrorKind::retryable`]. No other part of the codebase is allowed to
//! make that call independently.

use thiserror::Error;

/// Coarse classification used to decide retry/DLQ routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Wire-format or contract validation failure.
    Validation,
    /// Broker or adapter connectivity problem.
    TransientNetwork,
    /// An operation exceeded its deadline.
    Timeout,
    /// A rate limit was hit (ours or the adapter's).
    RateLimited,
    /// The engine or model adapter failed to produce a usable result.
    ProcessingFailed,
    /// The payload could not be parsed or validated at all.
    PoisonMessage,
    /// Anything unexpected; retried once, then routed to DLQ.
    Internal,
}

impl ErrorKind {
    /// Whether a task consumer should retry on this kind of failure, given
    /// the number of retries already attempted (0 on the first delivery).
    ///
    /// `Internal` gets exactly one retry: it covers unexpected failures that
    /// are often transient but may also be a genuine bug, so it earns a
    /// single extra attempt before dead-lettering rather than none or
    /// unlimited retries.
    #[must_use]
    pub const fn retryable_at(self, retry_count: u32) -> bool {
        match self {
            Self::TransientNetwork | Self::Timeout | Self::RateLimited => true,
            Self::Internal => retry_count == 0,
            Self::Validation | Self::ProcessingFailed | Self::PoisonMessage => false,
        }
    }

    /// Wire-format name used in `TaskErrorDetail.code` and log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::TransientNetwork => "TRANSIENT_NETWORK",
            Self::Timeout => "TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::ProcessingFailed => "PROCESSING_FAILED",
            Self::PoisonMessage => "POISON_MESSAGE",
            Self::Internal => "INTERNAL",
        }
    }
}

/// The single error type propagated through contract validation, the broker
/// client, the task engine, and the consumer/dispatcher.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("broker connectivity error: {0}")]
    TransientNetwork(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("task processing failed: {0}")]
    ProcessingFailed(String),

    #[error("message could not be parsed: {0}")]
    PoisonMessage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// The kind this error belongs to, used by the consumer's retry policy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ProcessingFailed(_) => ErrorKind::ProcessingFailed,
            Self::PoisonMessage(_) => ErrorKind::PoisonMessage,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error is retryable in isolation, i.e. on a first
    /// delivery. Used where no retry count is in scope (logging, wire
    /// `TaskErrorDetail.retryable`); the consumer's actual retry/DLQ
    /// decision goes through [`Self::is_retryable_at`].
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind().retryable_at(0)
    }

    /// Whether the consumer should retry this error given `retry_count`
    /// retries already attempted.
    #[must_use]
    pub const fn is_retryable_at(&self, retry_count: u32) -> bool {
        self.kind().retryable_at(retry_count)
    }
}

impl From<lapin::Error> for PipelineError {
    fn from(err: lapin::Error) -> Self {
        Self::TransientNetwork(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::PoisonMessage(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(std::time::Duration::from_secs(0))
        } else if err.is_connect() {
            Self::TransientNetwork(err.to_string())
        } else {
            Self::ProcessingFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_the_table() {
        assert!(ErrorKind::TransientNetwork.retryable_at(0));
        assert!(ErrorKind::Timeout.retryable_at(0));
        assert!(ErrorKind::RateLimited.retryable_at(0));
        assert!(!ErrorKind::Validation.retryable_at(0));
        assert!(!ErrorKind::ProcessingFailed.retryable_at(0));
        assert!(!ErrorKind::PoisonMessage.retryable_at(0));
    }

    #[test]
    fn internal_is_retryable_exactly_once() {
        assert!(ErrorKind::Internal.retryable_at(0));
        assert!(!ErrorKind::Internal.retryable_at(1));
        assert!(!ErrorKind::Internal.retryable_at(5));
    }

    #[test]
    fn error_kind_matches_variant() {
        let err = PipelineError::RateLimited { retry_after_ms: 500 };
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());

        let err = PipelineError::ProcessingFailed("bad output".into());
        assert!(!err.is_retryable());
    }
}
