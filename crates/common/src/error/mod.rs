//! Error taxonomy for calls made against the remote transcription service.
//!
//! # Error Handling Architecture
//!
//! The error handling system is built on four pieces:
//!
//! 1. **[`ServiceError`]**: a tagged sum type describing every way an outbound
//!    call (submission, status query, result fetch) can fail. Each variant
//!    carries the payload the classifier needs.
//!
//! 2. **[`classify`]**: a pure, total function that maps a `ServiceError` to an
//!    [`ErrorClassification`]. Category precedence is service code, then
//!    HTTP-like status, then message patterns.
//!
//! 3. **[`ErrorClassification`]**: category, retry strategy, retryability,
//!    severity, user-intervention flag, suggestion and an estimated recovery
//!    time. Computed fresh per error.
//!
//! 4. **[`Classify`] trait**: the uniform interface every crate-level error
//!    enum implements so retry and alerting logic can treat them alike.
//!
//! ## Category table
//!
//! | Category | Strategy | Retryable | Severity | User action |
//! |----------|----------|-----------|----------|-------------|
//! | network | exponential | yes | 2 | no |
//! | quota | exponential | yes | 3 | no |
//! | authentication | none | no | 4 | yes |
//! | audio | none | no | 3 | yes |
//! | configuration | none | no | 3 | yes |
//! | service | exponential | yes | 4 | no |
//! | circuit_open | fixed | yes | 3 | no |
//! | unknown | linear | yes | 3 | no |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::serde::{duration_millis, option_duration_millis};

pub mod classifier;

pub use classifier::classify;

/// Result alias for outbound service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure of an outbound call or of processing its response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceError {
    /// The remote service answered with an error.
    #[error("remote service error: {message}")]
    Remote {
        /// Service-specific error code (e.g. `Unauthorized`, `InvalidLocale`).
        code: Option<String>,
        /// HTTP-like status code, when the transport exposes one.
        status: Option<u16>,
        message: String,
        /// Retry-after hint sent by the service.
        #[serde(default, with = "option_duration_millis")]
        retry_after: Option<Duration>,
    },

    /// The request never reached the service or the connection broke.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// An attempt exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        #[serde(with = "duration_millis")]
        timeout: Duration,
    },

    /// Local admission control refused the call.
    #[error("rate limited ({reason}); retry after {retry_after:?}")]
    RateLimited {
        reason: String,
        #[serde(with = "duration_millis")]
        retry_after: Duration,
    },

    /// The circuit protecting `target` is open.
    #[error("circuit open for '{target}'; retry after {retry_after:?}")]
    CircuitOpen {
        target: String,
        #[serde(with = "duration_millis")]
        retry_after: Duration,
    },

    /// The request was rejected before submission.
    #[error("request validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    /// The result document exceeds the configured size limit.
    #[error("result document is {size} bytes, exceeding the {max} byte limit")]
    ResultTooLarge { size: u64, max: u64 },

    /// The result document could not be located or parsed.
    #[error("malformed result: {message}")]
    MalformedResult { message: String },

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// An invariant inside the orchestrator was violated.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ServiceError {
    /// Remote error carrying a service code.
    pub fn remote_code<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self::Remote { code: Some(code.into()), status: None, message: message.into(), retry_after: None }
    }

    /// Remote error carrying only a status code.
    pub fn remote_status<M: Into<String>>(status: u16, message: M) -> Self {
        Self::Remote { code: None, status: Some(status), message: message.into(), retry_after: None }
    }

    /// Remote error with neither code nor status; classified by message.
    pub fn remote_message<M: Into<String>>(message: M) -> Self {
        Self::Remote { code: None, status: None, message: message.into(), retry_after: None }
    }

    /// Transport-level failure.
    pub fn transport<M: Into<String>>(message: M) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Attempt timeout.
    pub fn timeout<O: Into<String>>(operation: O, timeout: Duration) -> Self {
        Self::Timeout { operation: operation.into(), timeout }
    }

    /// Malformed or missing result document.
    pub fn malformed<M: Into<String>>(message: M) -> Self {
        Self::MalformedResult { message: message.into() }
    }

    /// Internal invariant violation.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Attach a retry-after hint to a remote error. Other variants are
    /// returned unchanged.
    #[must_use]
    pub fn with_retry_after(self, hint: Duration) -> Self {
        match self {
            Self::Remote { code, status, message, .. } => {
                Self::Remote { code, status, message, retry_after: Some(hint) }
            }
            other => other,
        }
    }

    /// Whether this error is the cooperative-cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short machine-readable name of the variant, for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Remote { .. } => "remote",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Validation { .. } => "validation",
            Self::ResultTooLarge { .. } => "result_too_large",
            Self::MalformedResult { .. } => "malformed_result",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Failure category driving retry and recovery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity problems and timeouts.
    Network,
    /// Remote quota or local rate limits.
    Quota,
    /// Rejected credentials.
    Authentication,
    /// Audio or result content the service cannot process.
    Audio,
    /// Invalid request parameters or locale/model settings.
    Configuration,
    /// Remote outage or internal server errors.
    Service,
    /// Call short-circuited by an open circuit breaker.
    CircuitOpen,
    /// Anything the classifier could not place.
    Unknown,
}

impl ErrorCategory {
    /// All categories, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Network,
        Self::Quota,
        Self::Authentication,
        Self::Audio,
        Self::Configuration,
        Self::Service,
        Self::CircuitOpen,
        Self::Unknown,
    ];

    /// Categories that are retried locally without surfacing to the caller.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Quota | Self::Service | Self::CircuitOpen)
    }

    /// Categories that always need a human to act.
    pub fn needs_user(self) -> bool {
        matches!(self, Self::Authentication | Self::Audio | Self::Configuration)
    }

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Quota => "quota",
            Self::Authentication => "authentication",
            Self::Audio => "audio",
            Self::Configuration => "configuration",
            Self::Service => "service",
            Self::CircuitOpen => "circuit_open",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Do not retry.
    None,
    /// `base * attempt`
    Linear,
    /// `base * multiplier^(attempt - 1)`
    #[default]
    Exponential,
    /// `base` every time
    Fixed,
    /// Zero delay
    Immediate,
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Linear => "linear",
            Self::Exponential => "exponential",
            Self::Fixed => "fixed",
            Self::Immediate => "immediate",
        };
        f.write_str(name)
    }
}

/// Error severity on a 1-5 scale for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// 1: informational, expected conditions
    Info,
    /// 2: transient hiccup, usually self-healing
    Notice,
    /// 3: degraded, should be monitored
    Warning,
    /// 4: failure requiring attention
    Error,
    /// 5: system integrity at risk
    Critical,
}

impl ErrorSeverity {
    /// Numeric level in `1..=5`.
    pub fn level(self) -> u8 {
        match self {
            Self::Info => 1,
            Self::Notice => 2,
            Self::Warning => 3,
            Self::Error => 4,
            Self::Critical => 5,
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Notice => write!(f, "NOTICE"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Derived classification of a single error. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub strategy: RetryStrategy,
    pub retryable: bool,
    pub severity: ErrorSeverity,
    pub requires_user_intervention: bool,
    /// Human-readable next step.
    pub suggestion: String,
    #[serde(with = "duration_millis")]
    pub estimated_recovery: Duration,
}

impl ErrorClassification {
    /// Build a classification, deriving `requires_user_intervention` from
    /// retryability and category.
    pub fn new<S: Into<String>>(
        category: ErrorCategory,
        strategy: RetryStrategy,
        retryable: bool,
        severity: ErrorSeverity,
        suggestion: S,
        estimated_recovery: Duration,
    ) -> Self {
        let strategy = if retryable { strategy } else { RetryStrategy::None };
        Self {
            category,
            strategy,
            retryable,
            severity,
            requires_user_intervention: !retryable || category.needs_user(),
            suggestion: suggestion.into(),
            estimated_recovery,
        }
    }

    /// Default classification for a category.
    pub fn for_category(category: ErrorCategory) -> Self {
        use ErrorCategory as C;
        use ErrorSeverity as S;
        use RetryStrategy as R;

        match category {
            C::Network => Self::new(
                category,
                R::Exponential,
                true,
                S::Notice,
                "Check network connectivity; the request will be retried automatically.",
                Duration::from_secs(30),
            ),
            C::Quota => Self::new(
                category,
                R::Exponential,
                true,
                S::Warning,
                "Request quota reached; the request will be retried once capacity frees up.",
                Duration::from_secs(60),
            ),
            C::Authentication => Self::new(
                category,
                R::None,
                false,
                S::Error,
                "Verify the subscription key and region, then resubmit.",
                Duration::ZERO,
            ),
            C::Audio => Self::new(
                category,
                R::None,
                false,
                S::Warning,
                "Check the audio file format, length and accessibility, then resubmit.",
                Duration::ZERO,
            ),
            C::Configuration => Self::new(
                category,
                R::None,
                false,
                S::Warning,
                "Review the transcription settings (locale, model, options) and resubmit.",
                Duration::ZERO,
            ),
            C::Service => Self::new(
                category,
                R::Exponential,
                true,
                S::Error,
                "The transcription service is unavailable; retrying with backoff.",
                Duration::from_secs(300),
            ),
            C::CircuitOpen => Self::new(
                category,
                R::Fixed,
                true,
                S::Warning,
                "Calls are paused while the service recovers; the job will resume automatically.",
                Duration::from_secs(60),
            ),
            C::Unknown => Self::new(
                category,
                R::Linear,
                true,
                S::Warning,
                "An unexpected error occurred; the request will be retried a limited number of times.",
                Duration::from_secs(60),
            ),
        }
    }

    /// Override the estimated recovery time.
    #[must_use]
    pub fn with_recovery(mut self, estimated_recovery: Duration) -> Self {
        self.estimated_recovery = estimated_recovery;
        self
    }

    /// Override the suggestion text.
    #[must_use]
    pub fn with_suggestion<S: Into<String>>(mut self, suggestion: S) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    /// Mark the error as non-retryable, keeping the derived fields
    /// consistent.
    #[must_use]
    pub fn non_retryable(self) -> Self {
        Self::new(
            self.category,
            RetryStrategy::None,
            false,
            self.severity,
            self.suggestion,
            Duration::ZERO,
        )
    }

    /// Override the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Uniform classification interface for crate-level error enums.
pub trait Classify {
    /// Whether the operation may succeed if attempted again.
    fn is_retryable(&self) -> bool;

    /// Severity for monitoring and alerting.
    fn severity(&self) -> ErrorSeverity;

    /// Whether the error indicates an integrity problem.
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Suggested delay before retrying, when one is known.
    fn retry_after(&self) -> Option<Duration>;
}

impl Classify for ServiceError {
    fn is_retryable(&self) -> bool {
        classify(self).retryable
    }

    fn severity(&self) -> ErrorSeverity {
        classify(self).severity
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Remote { retry_after, .. } => *retry_after,
            Self::RateLimited { retry_after, .. } | Self::CircuitOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}
