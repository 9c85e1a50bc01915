//! Retry-bound and backoff-shape properties for the consumer's retry policy.

use taskmesh_pipeline::consumer::retry::{RetryDecision, RetryPolicy};
use taskmesh_pipeline::errors::PipelineError;
use test_strategy::proptest;

/// Walk a retry policy forward from `retry_count = 0` until it dead-letters,
/// applying the policy exactly the way the dispatcher does on each failed
/// redelivery, and returns the number of republishes observed.
fn republish_count_until_dead_letter(policy: &RetryPolicy, error: &PipelineError) -> u32 {
    let mut retry_count = 0;
    let mut republishes = 0;
    loop {
        match policy.decide(retry_count, error) {
            RetryDecision::Republish { next_retry_count, .. } => {
                republishes += 1;
                retry_count = next_retry_count;
                // Guard against a runaway loop if a future change breaks the
                // decreasing-retries-remaining invariant this test checks.
                assert!(republishes <= policy.max_retries + 1, "policy failed to converge");
            }
            RetryDecision::DeadLetter => break,
        }
    }
    republishes
}

#[proptest]
fn retryable_errors_never_republish_more_than_max_retries_times(
    #[strategy(0u32..20)] max_retries: u32,
    #[strategy(1u64..5_000)] retry_delay_ms: u64,
    #[strategy(1u64..120_000)] max_backoff_ms: u64,
) {
    let policy = RetryPolicy::new(max_retries, retry_delay_ms, max_backoff_ms);
    let error = PipelineError::TransientNetwork("connection reset".into());

    let republishes = republish_count_until_dead_letter(&policy, &error);

    assert!(republishes <= max_retries);
}

#[proptest]
fn backoff_never_exceeds_the_configured_cap(
    #[strategy(0u32..40)] attempt: u32,
    #[strategy(1u64..10_000)] retry_delay_ms: u64,
    #[strategy(1u64..60_000)] max_backoff_ms: u64,
) {
    let policy = RetryPolicy::new(10, retry_delay_ms, max_backoff_ms);
    let delay = policy.backoff_for(attempt);

    assert!(delay.as_millis() as u64 <= max_backoff_ms);
}

#[test]
fn non_retryable_errors_dead_letter_with_zero_republishes() {
    let policy = RetryPolicy::new(5, 1000, 30_000);
    let error = PipelineError::Validation("bad prompt".into());

    assert_eq!(republish_count_until_dead_letter(&policy, &error), 0);
}

#[test]
fn zero_max_retries_dead_letters_immediately_even_when_retryable() {
    let policy = RetryPolicy::new(0, 1000, 30_000);
    let error = PipelineError::TransientNetwork("down".into());

    assert_eq!(republish_count_until_dead_letter(&policy, &error), 0);
}
