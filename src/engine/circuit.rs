//! Per-adapter circuit breaker: trips after a run of consecutive failures,
//! cools down, then probes with a single half-open call before closing.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tracks consecutive failures for one adapter and decides whether calls are
/// allowed through.
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_duration: Duration,
    consecutive_failures: AtomicU32,
    opened_at_epoch_ms: AtomicU64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            open_duration,
            consecutive_failures: AtomicU32::new(0),
            opened_at_epoch_ms: AtomicU64::new(0),
        }
    }

    /// Current state, transitioning Open -> HalfOpen once `open_duration` elapses.
    pub fn state(&self) -> CircuitState {
        let opened_at = self.opened_at_epoch_ms.load(Ordering::SeqCst);
        if opened_at == 0 {
            return CircuitState::Closed;
        }
        let elapsed = now_epoch_ms().saturating_sub(opened_at);
        if elapsed >= self.open_duration.as_millis() as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Check whether a call may proceed right now.
    ///
    /// # Errors
    /// Returns [`PipelineError::ProcessingFailed`] if the circuit is open.
    pub fn check(&self) -> Result<(), PipelineError> {
        match self.state() {
            CircuitState::Open => Err(PipelineError::ProcessingFailed(
                "circuit breaker open".to_string(),
            )),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.opened_at_epoch_ms.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            self.opened_at_epoch_ms.store(now_epoch_ms(), Ordering::SeqCst);
        }
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_under_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn opens_at_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.check().is_err());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_cooldown_elapses() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.check().is_ok());
    }
}
