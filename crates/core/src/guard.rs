//! Resilience envelope for outbound calls
//!
//! Every call to the remote service goes through [`ServiceGuard::call`]:
//!
//! ```text
//! retry coordinator
//!   └─ circuit breaker admission (per target)
//!        └─ rate limiter permit (job priority)
//!             └─ credentials -> operation
//! ```
//!
//! The breaker is consulted before the limiter so an open circuit does not
//! consume request budget.

use std::future::Future;
use std::sync::Arc;

use scribeflow_common::resilience::{
    AdmissionPriority, CircuitBreakerRegistry, RateLimiter, RetryCoordinator,
};
use scribeflow_common::{classify, Clock, ServiceError, SystemClock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ports::{CredentialProvider, Credentials};

/// Retry, circuit breaking and rate limiting around one remote operation.
pub struct ServiceGuard<C: Clock + Clone = SystemClock> {
    retry: RetryCoordinator,
    limiter: RateLimiter<C>,
    breakers: Arc<CircuitBreakerRegistry<C>>,
    credentials: Arc<dyn CredentialProvider>,
}

impl<C: Clock + Clone> ServiceGuard<C> {
    /// Assemble a guard from its primitives.
    pub fn new(
        retry: RetryCoordinator,
        limiter: RateLimiter<C>,
        breakers: Arc<CircuitBreakerRegistry<C>>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self { retry, limiter, breakers, credentials }
    }

    /// The shared admission limiter.
    pub fn limiter(&self) -> &RateLimiter<C> {
        &self.limiter
    }

    /// Per-target circuit breakers.
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry<C>> {
        &self.breakers
    }

    /// The coordinator that retries each guarded call.
    pub fn retry(&self) -> &RetryCoordinator {
        &self.retry
    }

    /// Run `operation` against `target` under the full resilience stack.
    ///
    /// Transient failures are retried locally; the returned error is the
    /// last one observed once attempts run out or a non-retryable error
    /// occurs.
    pub async fn call<T, F, Fut>(
        &self,
        target: &str,
        priority: AdmissionPriority,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ServiceError>
    where
        F: Fn(Credentials) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let breaker = self.breakers.get(target);
        let operation = &operation;

        let report = self
            .retry
            .execute(target, cancel, |_attempt| {
                let breaker = Arc::clone(&breaker);
                async move {
                    breaker.try_acquire().map_err(|rejection| ServiceError::CircuitOpen {
                        target: target.to_string(),
                        retry_after: rejection.retry_after,
                    })?;

                    let _permit = self.limiter.acquire(priority).await?;
                    let credentials = self.credentials.credentials().await?;

                    match operation(credentials).await {
                        Ok(value) => {
                            breaker.record_success();
                            Ok(value)
                        }
                        Err(error) => {
                            if !error.is_cancelled() {
                                breaker.record_failure(classify(&error).category);
                            }
                            Err(error)
                        }
                    }
                }
            })
            .await;

        if report.attempt_count() > 1 {
            debug!(
                target,
                attempts = report.attempt_count(),
                total_delay_ms = u64::try_from(report.total_delay().as_millis()).unwrap_or(u64::MAX),
                "Guarded call finished after retries"
            );
        }

        report.into_result()
    }
}
