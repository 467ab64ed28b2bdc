//! Views of the remote service's responses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_domain_status_conversions;

/// Job status as reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteJobStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl_domain_status_conversions!(RemoteJobStatus {
    NotStarted => "not_started",
    Running => "running",
    Succeeded => "succeeded",
    Failed => "failed",
});

impl RemoteJobStatus {
    /// `true` once the remote job will not change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Remote quota consumption, reported alongside some responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub used: u64,
    pub limit: u64,
}

/// Error details of a job the remote service failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// Response of the status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: RemoteJobStatus,
    /// Percentage reported by the service, when it reports one
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_action_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure: Option<RemoteFailure>,
    #[serde(default)]
    pub quota: Option<QuotaUsage>,
}

impl StatusReport {
    /// A report with only `status` set.
    pub fn new(status: RemoteJobStatus) -> Self {
        Self { status, progress: None, created_at: None, last_action_at: None, failure: None, quota: None }
    }

    #[must_use]
    pub fn with_progress(mut self, percent: f64) -> Self {
        self.progress = Some(percent);
        self
    }

    #[must_use]
    pub fn with_failure<S: Into<String>>(mut self, code: Option<String>, message: S) -> Self {
        self.failure = Some(RemoteFailure { code, message: message.into() });
        self
    }

    #[must_use]
    pub fn with_quota(mut self, used: u64, limit: u64) -> Self {
        self.quota = Some(QuotaUsage { used, limit });
        self
    }
}

/// Response of the submission gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub external_id: String,
    #[serde(default)]
    pub quota: Option<QuotaUsage>,
}

/// Kind of an artifact listed for a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFileKind {
    Transcription,
    Report,
    Other,
}

/// An artifact listed for a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFile {
    pub name: String,
    pub kind: ResultFileKind,
    /// Size in bytes as listed
    pub size: u64,
    pub url: String,
}
