//! Managed job model and lifecycle transitions
//!
//! A [`ManagedJob`] only changes through the consuming transition functions
//! below. Each one validates the move against the state machine
//!
//! ```text
//! pending -> submitted -> processing -> completed
//!                 \            |  ^
//!                  \           +--+ (retry re-entry)
//!                   +--> failed | cancelled (from any non-terminal state)
//! ```
//!
//! and appends exactly one history entry, so the history is append-only and
//! closes with the first terminal entry.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scribeflow_common::resilience::AdmissionPriority;
use scribeflow_common::ErrorCategory;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::TranscriptionRequest;
use super::transcript::TranscriptionResult;
use crate::errors::TransitionError;
use crate::impl_domain_status_conversions;

/// Unique job identifier (time-ordered UUID v7).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Scheduling priority. Ordering follows urgency: `Urgent > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl_domain_status_conversions!(JobPriority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
});

impl JobPriority {
    /// Rate-limiter queue tier for calls made on behalf of this job.
    pub fn admission(self) -> AdmissionPriority {
        match self {
            Self::Urgent | Self::High => AdmissionPriority::High,
            Self::Normal => AdmissionPriority::Normal,
            Self::Low => AdmissionPriority::Low,
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Submitted,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl_domain_status_conversions!(JobStatus {
    Pending => "pending",
    Submitted => "submitted",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl JobStatus {
    /// No further transition occurs from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One entry of a job's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// What a caller sees when a job fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub category: ErrorCategory,
    pub message: String,
    pub retry_possible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

/// Orchestration-layer wrapper around one transcription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedJob {
    id: JobId,
    external_id: Option<String>,
    priority: JobPriority,
    status: JobStatus,
    history: Vec<StatusEntry>,
    request: TranscriptionRequest,
    /// Opaque caller configuration carried with the job.
    config: serde_json::Value,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    retry_count: u32,
    last_retry_reason: Option<String>,
    recovered_from: Option<JobId>,
    progress: u8,
    result: Option<TranscriptionResult>,
    error: Option<FailureReport>,
}

impl ManagedJob {
    /// New pending job with a single `pending` history entry.
    pub fn new(
        request: TranscriptionRequest,
        priority: JobPriority,
        config: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            external_id: None,
            priority,
            status: JobStatus::Pending,
            history: vec![StatusEntry { status: JobStatus::Pending, at: now, note: Some("queued".into()) }],
            request,
            config,
            queued_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            last_retry_reason: None,
            recovered_from: None,
            progress: 0,
            result: None,
            error: None,
        }
    }

    /// Link this job to the failed job it re-attempts.
    #[must_use]
    pub fn recovering(mut self, original: JobId) -> Self {
        self.recovered_from = Some(original);
        self
    }

    // ----- accessors -----

    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Id assigned by the remote service, cleared on retry.
    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Every status the job entered, oldest first.
    pub fn history(&self) -> &[StatusEntry] {
        &self.history
    }

    pub fn request(&self) -> &TranscriptionRequest {
        &self.request
    }

    /// Opaque caller configuration carried with the job.
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    /// When the job was queued.
    pub fn queued_at(&self) -> DateTime<Utc> {
        self.queued_at
    }

    /// When the current attempt began: first submission or the latest retry.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// When the job was first handed to the remote service. Unlike
    /// [`started_at`](Self::started_at) this survives retry re-entries.
    pub fn first_submitted_at(&self) -> Option<DateTime<Utc>> {
        self.history.iter().find(|entry| entry.status == JobStatus::Submitted).map(|entry| entry.at)
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Why the last job-level retry happened.
    pub fn last_retry_reason(&self) -> Option<&str> {
        self.last_retry_reason.as_deref()
    }

    /// The job this one was resubmitted from by a recovery sweep.
    pub fn recovered_from(&self) -> Option<&JobId> {
        self.recovered_from.as_ref()
    }

    /// Progress in percent, 0 to 100.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn result(&self) -> Option<&TranscriptionResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&FailureReport> {
        self.error.as_ref()
    }

    /// `true` once completed, failed or cancelled.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time between queueing and the (latest) start.
    pub fn queue_wait(&self) -> Option<Duration> {
        self.started_at.and_then(|started| (started - self.queued_at).to_std().ok())
    }

    /// Time between the (latest) start and reaching a terminal status.
    pub fn run_time(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => (completed - started).to_std().ok(),
            _ => None,
        }
    }

    // ----- transitions -----

    /// `pending -> submitted`: dequeued and handed to the submission gateway.
    pub fn mark_submitted(self, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        self.require(JobStatus::Submitted, |s| s == JobStatus::Pending)?;
        let mut job = self.push(JobStatus::Submitted, now, None);
        job.started_at = Some(now);
        Ok(job)
    }

    /// `submitted -> processing`: the remote service accepted the job.
    ///
    /// Also valid from `processing` after a retry re-entry cleared the
    /// previous external id.
    pub fn mark_processing<S: Into<String>>(self, external_id: S, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        let resubmitted = self.status == JobStatus::Processing && self.external_id.is_none();
        self.require(JobStatus::Processing, |s| s == JobStatus::Submitted || resubmitted)?;
        let external_id = external_id.into();
        let note = format!("accepted as {external_id}");
        let mut job = self.push(JobStatus::Processing, now, Some(note));
        job.external_id = Some(external_id);
        Ok(job)
    }

    /// Retry re-entry: a self-loop on `submitted` or `processing` that counts
    /// the attempt, restarts the timing and forgets the remote job id.
    pub fn retry<S: Into<String>>(self, reason: S, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        let current = self.status;
        self.require(current, |s| matches!(s, JobStatus::Submitted | JobStatus::Processing))?;
        let reason = reason.into();
        let note = format!("retry {}: {reason}", self.retry_count + 1);
        let mut job = self.push(current, now, Some(note));
        job.retry_count += 1;
        job.last_retry_reason = Some(reason);
        job.started_at = Some(now);
        job.external_id = None;
        job.progress = 0;
        Ok(job)
    }

    /// Record observed progress. Progress never decreases and is not
    /// recorded in the history.
    pub fn record_progress(mut self, percent: u8) -> Result<Self, TransitionError> {
        if self.status.is_terminal() {
            return Err(self.invalid(self.status));
        }
        self.progress = self.progress.max(percent.min(99));
        Ok(self)
    }

    /// `processing -> completed` with the collected result.
    pub fn complete(self, result: TranscriptionResult, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        self.require(JobStatus::Completed, |s| s == JobStatus::Processing)?;
        let mut job = self.push(JobStatus::Completed, now, None);
        job.completed_at = Some(now);
        job.progress = 100;
        job.result = Some(result);
        Ok(job)
    }

    /// Any non-terminal status `-> failed`.
    pub fn fail(self, failure: FailureReport, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        self.require(JobStatus::Failed, |s| !s.is_terminal())?;
        let note = failure.message.clone();
        let mut job = self.push(JobStatus::Failed, now, Some(note));
        job.completed_at = Some(now);
        job.progress = 0;
        job.error = Some(failure);
        Ok(job)
    }

    /// Any non-terminal status `-> cancelled`.
    pub fn cancel(self, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        self.require(JobStatus::Cancelled, |s| !s.is_terminal())?;
        let mut job = self.push(JobStatus::Cancelled, now, Some("cancelled by caller".into()));
        job.completed_at = Some(now);
        job.progress = 0;
        Ok(job)
    }

    fn require(&self, to: JobStatus, allowed: impl FnOnce(JobStatus) -> bool) -> Result<(), TransitionError> {
        if allowed(self.status) {
            Ok(())
        } else {
            Err(self.invalid(to))
        }
    }

    fn invalid(&self, to: JobStatus) -> TransitionError {
        TransitionError { job_id: self.id.clone(), from: self.status, to }
    }

    fn push(mut self, status: JobStatus, at: DateTime<Utc>, note: Option<String>) -> Self {
        self.status = status;
        self.history.push(StatusEntry { status, at, note });
        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn job() -> ManagedJob {
        let request = TranscriptionRequest::new("meeting.wav", "en-US", vec!["https://audio/1.wav".into()]);
        ManagedJob::new(request, JobPriority::Normal, serde_json::json!({"model": "base"}), at(0))
    }

    fn failure() -> FailureReport {
        FailureReport {
            category: ErrorCategory::Network,
            message: "connection reset".into(),
            retry_possible: true,
            suggested_action: None,
        }
    }

    // ===== Priority & status =====

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::Urgent > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
        assert_eq!("URGENT".parse::<JobPriority>().unwrap(), JobPriority::Urgent);
        assert_eq!(JobPriority::Urgent.admission(), AdmissionPriority::High);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    // ===== Happy path =====

    /// Validates the full success path.
    ///
    /// Assertions:
    /// - Confirms each transition appends exactly one entry.
    /// - Confirms the result is set and progress is 100 only on completion.
    #[test]
    fn test_success_path() {
        let job = job().mark_submitted(at(5)).unwrap();
        assert_eq!(job.queue_wait(), Some(Duration::from_secs(5)));

        let job = job.mark_processing("remote-1", at(6)).unwrap().record_progress(100).unwrap();
        assert_eq!(job.progress(), 99);
        assert_eq!(job.external_id(), Some("remote-1"));

        let job = job.complete(TranscriptionResult::default(), at(60)).unwrap();
        let statuses: Vec<_> = job.history().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Pending, JobStatus::Submitted, JobStatus::Processing, JobStatus::Completed]
        );
        assert_eq!(job.progress(), 100);
        assert!(job.result().is_some());
        assert_eq!(job.run_time(), Some(Duration::from_secs(55)));
    }

    // ===== Retry re-entry =====

    #[test]
    fn test_retry_self_loop() {
        let job = job()
            .mark_submitted(at(1))
            .unwrap()
            .mark_processing("remote-1", at(2))
            .unwrap()
            .retry("status query timed out", at(30))
            .unwrap();

        assert_eq!(job.status(), JobStatus::Processing);
        assert_eq!(job.retry_count(), 1);
        assert_eq!(job.last_retry_reason(), Some("status query timed out"));
        assert_eq!(job.external_id(), None);
        assert_eq!(job.started_at(), Some(at(30)));

        let job = job.mark_processing("remote-2", at(31)).unwrap();
        assert_eq!(job.external_id(), Some("remote-2"));
        assert!(job.clone().mark_processing("remote-3", at(32)).is_err());
    }

    #[test]
    fn test_retry_from_submitted_keeps_status() {
        let job = job().mark_submitted(at(1)).unwrap().retry("gateway refused", at(2)).unwrap();
        assert_eq!(job.status(), JobStatus::Submitted);
        assert!(job.mark_processing("remote-1", at(3)).is_ok());
    }

    // ===== Terminal states =====

    /// History is closed once a terminal entry is appended.
    #[test]
    fn test_terminal_history_is_closed() {
        let failed = job().mark_submitted(at(1)).unwrap().fail(failure(), at(2)).unwrap();
        let len = failed.history().len();

        assert!(failed.clone().cancel(at(3)).is_err());
        assert!(failed.clone().retry("again", at(3)).is_err());
        assert!(failed.clone().record_progress(10).is_err());
        let err = failed.clone().fail(failure(), at(4)).unwrap_err();
        assert_eq!(err.from, JobStatus::Failed);
        assert_eq!(failed.history().len(), len);
        assert_eq!(failed.error().map(|e| e.category), Some(ErrorCategory::Network));
    }

    #[test]
    fn test_cancel_from_pending() {
        let job = job().cancel(at(1)).unwrap();
        assert_eq!(job.status(), JobStatus::Cancelled);
        assert_eq!(job.completed_at(), Some(at(1)));
    }

    #[test]
    fn test_complete_requires_processing() {
        let err = job().complete(TranscriptionResult::default(), at(1)).unwrap_err();
        assert_eq!(err.from, JobStatus::Pending);
        assert_eq!(err.to, JobStatus::Completed);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let job = job().mark_submitted(at(1)).unwrap().record_progress(40).unwrap().record_progress(20).unwrap();
        assert_eq!(job.progress(), 40);
    }

    #[test]
    fn test_serde_roundtrip_preserves_history() {
        let job = job().mark_submitted(at(1)).unwrap().recovering(JobId::from("old"));
        let json = serde_json::to_string(&job).unwrap();
        let back: ManagedJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
        assert_eq!(back.recovered_from(), Some(&JobId::from("old")));
    }
}
