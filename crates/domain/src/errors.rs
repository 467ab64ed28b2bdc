//! Error types used throughout the orchestration crates

use std::time::Duration;

use scribeflow_common::{Classify, ErrorSeverity, ServiceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// A lifecycle transition the job state machine does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("job {job_id}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Main error type for orchestration operations
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum OrchestratorError {
    #[error("Job queue is full ({capacity} jobs)")]
    QueueFull { capacity: usize },

    #[error("Request validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl OrchestratorError {
    /// A configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// A persistence error.
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence(message.into())
    }
}

impl From<scribeflow_common::resilience::ConfigError> for OrchestratorError {
    fn from(error: scribeflow_common::resilience::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

impl Classify for OrchestratorError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::QueueFull { .. } | Self::Persistence(_) => true,
            Self::Service(error) => error.is_retryable(),
            Self::Validation { .. } | Self::NotFound(_) | Self::InvalidTransition(_) | Self::Config(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound(_) => ErrorSeverity::Notice,
            Self::QueueFull { .. } | Self::Validation { .. } | Self::Config(_) => ErrorSeverity::Warning,
            Self::Persistence(_) => ErrorSeverity::Error,
            Self::InvalidTransition(_) => ErrorSeverity::Critical,
            Self::Service(error) => error.severity(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Service(error) => error.retry_after(),
            _ => None,
        }
    }
}

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
