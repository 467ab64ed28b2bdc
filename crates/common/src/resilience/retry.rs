//! Retry coordinator for outbound service calls.
//!
//! Runs an operation up to `max_attempts` times. Delays between attempts
//! follow the failing error's category strategy
//! ([`ErrorClassification::strategy`]), falling back to the configured
//! [`RetryStrategy`] when the category has none. They are perturbed by a
//! jitter fraction and capped at `max_delay`. A configured strategy of
//! [`RetryStrategy::None`] disables retries altogether. Retries stop as soon as an error classifies as
//! non-retryable or falls outside the configured retryable categories.
//!
//! Every attempt is recorded in the returned [`RetryReport`], including the
//! one interrupted by cancellation.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{ConfigError, ConfigResult};
use crate::error::{classify, Classify, ErrorCategory, ErrorClassification, RetryStrategy, ServiceError};
use crate::utils::serde::{duration_millis, option_duration_millis};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub strategy: RetryStrategy,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor for exponential backoff
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1]`; a delay `d` becomes `d * (1 ± jitter)`
    pub jitter: f64,
    /// Deadline for a single attempt
    #[serde(with = "option_duration_millis")]
    pub attempt_timeout: Option<Duration>,
    /// Categories eligible for another attempt
    pub retryable_categories: BTreeSet<ErrorCategory>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            attempt_timeout: Some(Duration::from_secs(30)),
            retryable_categories: [
                ErrorCategory::Network,
                ErrorCategory::Quota,
                ErrorCategory::Service,
                ErrorCategory::Unknown,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::invalid("multiplier must be a finite value >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::invalid("jitter must be within [0, 1]"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid("max_delay must not be smaller than base_delay"));
        }
        if self.attempt_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::invalid("attempt_timeout must be greater than 0"));
        }
        Ok(())
    }

    /// Delay after failed attempt number `attempt` (1-based), without
    /// jitter, capped at `max_delay`.
    pub fn base_delay_for(&self, strategy: RetryStrategy, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match strategy {
            RetryStrategy::None | RetryStrategy::Immediate => Duration::ZERO,
            RetryStrategy::Fixed => self.base_delay,
            RetryStrategy::Linear => self.base_delay.saturating_mul(attempt),
            RetryStrategy::Exponential => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let factor = self.multiplier.powi(exponent);
                let millis = (self.base_delay.as_millis() as f64 * factor).round();
                if millis.is_finite() && millis < self.max_delay.as_millis() as f64 {
                    Duration::from_millis(millis as u64)
                } else {
                    self.max_delay
                }
            }
        };
        raw.min(self.max_delay)
    }

    /// Delay after failed attempt `attempt` with jitter applied, capped at
    /// `max_delay`.
    pub fn delay_for(&self, strategy: RetryStrategy, attempt: u32) -> Duration {
        let base = self.base_delay_for(strategy, attempt);
        apply_jitter(base, self.jitter).min(self.max_delay)
    }
}

fn apply_jitter(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-fraction..=fraction);
    delay.mul_f64(factor.max(0.0))
}

/// Builder for [`RetryConfig`] with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, fraction: f64) -> Self {
        self.config.jitter = fraction;
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter(0.0)
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.attempt_timeout = Some(timeout);
        self
    }

    pub fn no_attempt_timeout(mut self) -> Self {
        self.config.attempt_timeout = None;
        self
    }

    pub fn retryable_categories<I: IntoIterator<Item = ErrorCategory>>(mut self, categories: I) -> Self {
        self.config.retryable_categories = categories.into_iter().collect();
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// One attempt as observed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    pub succeeded: bool,
    pub duration: Duration,
    /// Delay waited before this attempt started
    pub delay_before: Duration,
    pub classification: Option<ErrorClassification>,
    pub error: Option<String>,
}

/// Why a retried operation ultimately failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure {
    /// Every allowed attempt failed with retryable errors.
    Exhausted { error: ServiceError, classification: ErrorClassification },
    /// The last error is not eligible for another attempt.
    NonRetryable { error: ServiceError, classification: ErrorClassification },
    /// The cancellation token fired.
    Cancelled,
}

impl RetryFailure {
    /// The underlying service error (`Cancelled` for cancellation).
    pub fn into_error(self) -> ServiceError {
        match self {
            Self::Exhausted { error, .. } | Self::NonRetryable { error, .. } => error,
            Self::Cancelled => ServiceError::Cancelled,
        }
    }

    /// Classification of the final error, if any.
    pub fn classification(&self) -> Option<&ErrorClassification> {
        match self {
            Self::Exhausted { classification, .. } | Self::NonRetryable { classification, .. } => {
                Some(classification)
            }
            Self::Cancelled => None,
        }
    }
}

/// Outcome of a coordinated operation plus the full attempt history.
#[derive(Debug)]
pub struct RetryReport<T> {
    pub outcome: Result<T, RetryFailure>,
    pub attempts: Vec<AttemptRecord>,
}

impl<T> RetryReport<T> {
    /// Number of attempts made.
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Sum of all inter-attempt delays.
    pub fn total_delay(&self) -> Duration {
        self.attempts.iter().map(|a| a.delay_before).sum()
    }

    /// Discard the history and return the result.
    pub fn into_result(self) -> Result<T, ServiceError> {
        self.outcome.map_err(RetryFailure::into_error)
    }
}

/// Executes operations under a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryCoordinator {
    config: RetryConfig,
}

impl RetryCoordinator {
    /// Create a coordinator, validating the configuration.
    pub fn new(config: RetryConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The retry policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Jittered delay after failed attempt `attempt` using `strategy`.
    pub fn delay_for(&self, strategy: RetryStrategy, attempt: u32) -> Duration {
        self.config.delay_for(strategy, attempt)
    }

    /// Run `operation` (called with the 1-based attempt number) until it
    /// succeeds, a stop condition is hit, or `cancel` fires.
    #[instrument(skip(self, cancel, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RetryReport<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempts = Vec::new();
        let mut delay_before = Duration::ZERO;
        let max_attempts = match self.config.strategy {
            RetryStrategy::None => 1,
            _ => self.config.max_attempts,
        };

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return RetryReport { outcome: Err(RetryFailure::Cancelled), attempts };
            }

            debug!(operation = operation_name, attempt, max_attempts, "Executing attempt");
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.run_attempt(operation_name, operation(attempt)) => Some(result),
            };
            let duration = started.elapsed();

            let error = match result {
                None => {
                    attempts.push(AttemptRecord {
                        attempt,
                        succeeded: false,
                        duration,
                        delay_before,
                        classification: None,
                        error: Some(ServiceError::Cancelled.to_string()),
                    });
                    return RetryReport { outcome: Err(RetryFailure::Cancelled), attempts };
                }
                Some(Ok(value)) => {
                    if attempt > 1 {
                        debug!(operation = operation_name, attempt, "Operation succeeded after retries");
                    }
                    attempts.push(AttemptRecord {
                        attempt,
                        succeeded: true,
                        duration,
                        delay_before,
                        classification: None,
                        error: None,
                    });
                    return RetryReport { outcome: Ok(value), attempts };
                }
                Some(Err(error)) => error,
            };

            let classification = classify(&error);
            attempts.push(AttemptRecord {
                attempt,
                succeeded: false,
                duration,
                delay_before,
                classification: Some(classification.clone()),
                error: Some(error.to_string()),
            });

            if !classification.retryable
                || !self.config.retryable_categories.contains(&classification.category)
            {
                debug!(
                    operation = operation_name,
                    attempt,
                    category = %classification.category,
                    "Error not eligible for retry"
                );
                return RetryReport {
                    outcome: Err(RetryFailure::NonRetryable { error, classification }),
                    attempts,
                };
            }

            if attempt >= max_attempts {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    category = %classification.category,
                    error = %error,
                    "All retry attempts exhausted"
                );
                return RetryReport {
                    outcome: Err(RetryFailure::Exhausted { error, classification }),
                    attempts,
                };
            }

            let strategy = match classification.strategy {
                RetryStrategy::None => self.config.strategy,
                category_strategy => category_strategy,
            };
            let computed = self.config.delay_for(strategy, attempt);
            delay_before = error.retry_after().map_or(computed, |hint| hint.max(computed)).min(self.config.max_delay);

            warn!(
                operation = operation_name,
                attempt,
                delay_ms = u64::try_from(delay_before.as_millis()).unwrap_or(u64::MAX),
                category = %classification.category,
                "Attempt failed, retrying"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return RetryReport { outcome: Err(RetryFailure::Cancelled), attempts };
                }
                () = tokio::time::sleep(delay_before) => {}
            }
        }

        // Unreachable with a validated config (max_attempts >= 1).
        let error = ServiceError::internal("retry loop ended without an attempt");
        let classification = classify(&error);
        RetryReport { outcome: Err(RetryFailure::NonRetryable { error, classification }), attempts }
    }

    async fn run_attempt<Fut, T>(&self, operation_name: &str, attempt: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        match self.config.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or_else(|_| Err(ServiceError::timeout(operation_name, limit))),
            None => attempt.await,
        }
    }
}
