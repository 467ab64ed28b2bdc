//! Integration tests for the resilience module
//!
//! Exercises the retry coordinator, circuit breaker and rate limiter together
//! the way an outbound call path stacks them.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scribeflow_common::resilience::{
    AdmissionPriority, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    MockClock, RateLimiter, RateLimiterConfig, RetryConfig, RetryCoordinator, RetryFailure,
};
use scribeflow_common::{ErrorCategory, RetryStrategy, ServiceError};
use tokio_util::sync::CancellationToken;

/// Validates recovery from transient failures with exponential backoff.
///
/// # Test Steps
/// 1. Configure 5 attempts, exponential backoff, no jitter
/// 2. Fail the first 3 attempts with a retryable network error
/// 3. Succeed on the 4th attempt
/// 4. Verify the attempt record and the delays waited
#[tokio::test(start_paused = true)]
async fn test_retry_recovers_from_transient_failures() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let config = RetryConfig::builder()
        .max_attempts(5)
        .strategy(RetryStrategy::Exponential)
        .base_delay(Duration::from_millis(100))
        .max_delay(Duration::from_secs(10))
        .no_jitter()
        .build()
        .expect("valid retry config");
    let coordinator = RetryCoordinator::new(config).expect("coordinator");

    let report = coordinator
        .execute("submit", &CancellationToken::new(), |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(ServiceError::transport("connection reset"))
                } else {
                    Ok("external-1")
                }
            }
        })
        .await;

    assert_eq!(report.attempt_count(), 4);
    assert_eq!(report.total_delay(), Duration::from_millis(100 + 200 + 400));
    assert!(report.attempts[..3].iter().all(|a| !a.succeeded));
    assert!(report.attempts[3].succeeded);
    assert_eq!(report.into_result().expect("succeeds"), "external-1");
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

/// Validates that authentication failures are not retried.
///
/// # Test Steps
/// 1. Fail with a 401 remote error
/// 2. Verify a single attempt and a non-retryable outcome needing the user
#[tokio::test(start_paused = true)]
async fn test_retry_stops_on_authentication_error() {
    let coordinator = RetryCoordinator::new(RetryConfig::default()).expect("coordinator");

    let report: scribeflow_common::resilience::RetryReport<()> = coordinator
        .execute("status", &CancellationToken::new(), |_| async {
            Err(ServiceError::remote_status(401, "bad key"))
        })
        .await;

    assert_eq!(report.attempt_count(), 1);
    match report.outcome {
        Err(RetryFailure::NonRetryable { classification, .. }) => {
            assert_eq!(classification.category, ErrorCategory::Authentication);
            assert!(classification.requires_user_intervention);
        }
        other => panic!("expected non-retryable failure, got {other:?}"),
    }
}

/// Validates that a breaker opened by repeated failures short-circuits the
/// retry loop with a distinct circuit-open error.
///
/// # Test Steps
/// 1. Trip the submission breaker with service outages
/// 2. Run a retried call through the open breaker
/// 3. Verify every attempt is rejected as circuit-open, never reaching the
///    operation
#[tokio::test(start_paused = true)]
async fn test_open_breaker_rejects_inside_retry_loop() {
    let clock = MockClock::new();
    let breaker = Arc::new(
        CircuitBreaker::with_clock("submission", CircuitBreakerConfig::default(), clock.clone())
            .expect("breaker"),
    );
    for _ in 0..5 {
        breaker.record_failure(ErrorCategory::Service);
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let calls = Arc::new(AtomicU32::new(0));
    let config = RetryConfig::builder()
        .max_attempts(3)
        .strategy(RetryStrategy::Fixed)
        .base_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(10))
        .no_jitter()
        .build()
        .expect("valid retry config");
    let coordinator = RetryCoordinator::new(config).expect("coordinator");

    let report = coordinator
        .execute("submit", &CancellationToken::new(), |_| {
            let breaker = Arc::clone(&breaker);
            let calls = Arc::clone(&calls);
            async move {
                breaker
                    .execute(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, ServiceError>(())
                    })
                    .await
            }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let classification = report.outcome.as_ref().err().and_then(RetryFailure::classification).cloned();
    assert_eq!(classification.map(|c| c.category), Some(ErrorCategory::CircuitOpen));
    assert_eq!(breaker.metrics().window_len, 0);
}

/// Validates the breaker lifecycle from open through half-open back to
/// closed using deterministic time.
#[tokio::test]
async fn test_breaker_recovers_after_timeout() {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig::builder()
        .timeout(Duration::from_secs(10))
        .success_threshold(2)
        .half_open_admission(1.0)
        .build()
        .expect("valid breaker config");
    let registry = CircuitBreakerRegistry::with_clock(config, clock.clone()).expect("registry");
    let breaker = registry.get("results");

    for _ in 0..5 {
        let _ = breaker.execute(|| async { Err::<(), _>(ServiceError::transport("refused")) }).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(10));
    for _ in 0..2 {
        breaker.execute(|| async { Ok::<_, ServiceError>(()) }).await.expect("probe passes");
    }
    assert_eq!(registry.get("results").state(), CircuitState::Closed);
}

/// Validates that rate-limited admission surfaces as a retryable quota error
/// and that the retry coordinator honours its retry-after hint.
#[tokio::test(start_paused = true)]
async fn test_rate_limited_calls_retry_after_hint() {
    let clock = MockClock::new();
    let config = RateLimiterConfig::builder().requests_per_minute(1).build().expect("valid limiter config");
    let limiter = RateLimiter::with_clock(config, clock.clone()).expect("limiter");
    drop(limiter.try_acquire(AdmissionPriority::Normal).expect("first call admitted"));

    let retry = RetryConfig::builder()
        .max_attempts(2)
        .base_delay(Duration::from_millis(10))
        .max_delay(Duration::from_secs(120))
        .no_jitter()
        .build()
        .expect("valid retry config");
    let coordinator = RetryCoordinator::new(retry).expect("coordinator");

    let report = coordinator
        .execute("status", &CancellationToken::new(), |attempt| {
            let limiter = limiter.clone();
            let clock = clock.clone();
            async move {
                if attempt > 1 {
                    clock.advance(Duration::from_secs(60));
                }
                let _permit = limiter.try_acquire(AdmissionPriority::Normal)?;
                Ok::<_, ServiceError>(attempt)
            }
        })
        .await;

    assert_eq!(report.attempts[1].delay_before, Duration::from_secs(60));
    assert_eq!(report.into_result().expect("second attempt admitted"), 2);
}
