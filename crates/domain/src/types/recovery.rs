//! Failure and recovery records

use chrono::{DateTime, Utc};
use scribeflow_common::{ErrorClassification, ServiceError};
use serde::{Deserialize, Serialize};

use super::job::{JobId, ManagedJob};
use crate::impl_domain_status_conversions;

/// Remediation chosen for a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Retry right away
    ImmediateRetry,
    /// Retry after a backoff delay
    DelayedRetry,
    /// Wait for the open circuit to probe again, then retry
    CircuitBreakerWait,
    /// Stop and ask the user to fix something
    UserIntervention,
    /// Give up and mark the job permanently failed
    GracefulDegradation,
    /// Park the job for a later batch re-attempt
    Persist,
}

impl_domain_status_conversions!(RecoveryStrategy {
    ImmediateRetry => "immediate_retry",
    DelayedRetry => "delayed_retry",
    CircuitBreakerWait => "circuit_breaker_wait",
    UserIntervention => "user_intervention",
    GracefulDegradation => "graceful_degradation",
    Persist => "persist",
});

/// A failed job parked for later recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJobRecord {
    /// Snapshot of the job at the time of failure
    pub job: ManagedJob,
    pub error: ServiceError,
    pub classification: ErrorClassification,
    /// Recovery attempts made so far, including the original run
    pub attempts: u32,
    /// Earliest time the record may be re-attempted
    pub retry_after: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    /// Job currently re-attempting this record, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resubmitted_as: Option<JobId>,
}

impl FailedJobRecord {
    /// Whether a sweep at `now` may re-attempt this record.
    pub fn is_due(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        self.resubmitted_as.is_none() && self.retry_after <= now && self.attempts < max_attempts
    }

    /// Id of the first job in this record's recovery lineage.
    pub fn lineage_root(&self) -> &JobId {
        self.job.recovered_from().unwrap_or_else(|| self.job.id())
    }
}
