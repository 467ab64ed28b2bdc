//! Resilience primitives guarding calls to the remote transcription service
//!
//! - **Retry Coordinator** ([`retry`]): bounded attempts with strategy-driven
//!   delays, jitter, per-attempt timeouts, cooperative cancellation and a
//!   full attempt record.
//! - **Circuit Breaker** ([`circuit_breaker`]): rolling-window failure rate
//!   with category-aware tripping and probabilistic half-open probes.
//! - **Rate Limiter** ([`rate_limiter`]): minute/hour/day sliding windows, a
//!   concurrency cap, a priority wait queue and adaptive quota scaling.
//!
//! Every primitive takes a [`Clock`] so time-dependent behavior can be
//! tested deterministically with [`MockClock`].

pub mod circuit_breaker;
pub mod clock;
pub mod rate_limiter;
pub mod retry;

use thiserror::Error;

pub use circuit_breaker::{
    BreakerRejection, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitBreakerRegistry, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use rate_limiter::{
    AdmissionPriority, RateLimitRejection, RateLimiter, RateLimiterConfig,
    RateLimiterConfigBuilder, RateLimiterSnapshot, RatePermit,
};
pub use retry::{
    AttemptRecord, RetryConfig, RetryConfigBuilder, RetryCoordinator, RetryFailure, RetryReport,
};

/// Invalid resilience configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;
