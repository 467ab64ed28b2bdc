//! Infrastructure error type

mod conversions;

use std::path::PathBuf;
use std::time::Duration;

use scribeflow_common::{Classify, ErrorSeverity};
use scribeflow_domain::OrchestratorError;
use thiserror::Error;

/// Errors raised by configuration, logging, persistence and the driver.
#[derive(Debug, Error)]
pub enum InfraError {
    /// Configuration could not be found, read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A filesystem operation failed
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The global subscriber could not be installed
    #[error("Logging initialisation failed: {0}")]
    Logging(String),

    /// The driver is already running
    #[error("Driver already running")]
    AlreadyRunning,

    /// The driver is not running
    #[error("Driver not running")]
    NotRunning,

    /// A lifecycle operation did not finish in time
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// A background task panicked or was aborted
    #[error("Task join failed: {0}")]
    TaskJoin(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl InfraError {
    /// A configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// An I/O failure on `path`.
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

impl Classify for InfraError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Timeout { .. } => true,
            Self::Orchestrator(error) => error.is_retryable(),
            Self::Config(_)
            | Self::Serialization(_)
            | Self::Logging(_)
            | Self::AlreadyRunning
            | Self::NotRunning
            | Self::TaskJoin(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::AlreadyRunning | Self::NotRunning => ErrorSeverity::Notice,
            Self::Config(_) | Self::Logging(_) | Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::Io { .. } | Self::Serialization(_) => ErrorSeverity::Error,
            Self::TaskJoin(_) => ErrorSeverity::Critical,
            Self::Orchestrator(error) => error.severity(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Orchestrator(error) => error.retry_after(),
            _ => None,
        }
    }
}

/// Convenience type alias for infrastructure operations
pub type InfraResult<T> = Result<T, InfraError>;
