//! Statistics snapshots exposed for observability
//!
//! - Scheduler statistics (container sizes, lifetime totals, timings)
//! - Recovery statistics (attempt outcomes, strategy usage)

use std::collections::BTreeMap;
use std::time::Duration;

use scribeflow_common::option_duration_millis;
use serde::{Deserialize, Serialize};

use super::job::ManagedJob;
use super::recovery::RecoveryStrategy;

/* -------------------------------------------------------------------------- */
/* Scheduler Statistics */
/* -------------------------------------------------------------------------- */

/// Scheduler statistics
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchedulerStatistics {
    /// Jobs currently holding a concurrency slot
    pub active: usize,
    /// Jobs waiting in the priority queue
    pub queued: usize,
    /// Completed jobs still retained in memory
    pub completed: usize,
    /// Failed jobs still retained in memory
    pub failed: usize,
    /// Cancelled jobs still retained in memory
    pub cancelled: usize,

    /// Lifetime totals
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_retries: u64,

    /// Completed / (completed + failed), 0 when nothing finished
    pub success_rate: f64,
    /// Mean start-to-completion time of completed jobs
    #[serde(default, with = "option_duration_millis")]
    pub average_duration: Option<Duration>,
    /// Mean queue wait of started jobs
    #[serde(default, with = "option_duration_millis")]
    pub average_queue_wait: Option<Duration>,
    /// active / max_concurrent
    pub utilization: f64,
    pub max_concurrent: usize,
}

/* -------------------------------------------------------------------------- */
/* Recovery Statistics */
/* -------------------------------------------------------------------------- */

/// Recovery statistics
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecoveryStatistics {
    /// Failures handed to the orchestrator
    pub attempts: u64,
    /// Recovered jobs that went on to complete
    pub successes: u64,
    /// Recovery attempts that ended in a terminal failure
    pub failures: u64,
    /// How often each strategy was selected
    pub by_strategy: BTreeMap<RecoveryStrategy, u64>,
    /// Records currently parked
    pub parked: usize,
}

impl RecoveryStatistics {
    /// successes / (successes + failures), 0 when nothing resolved
    pub fn success_rate(&self) -> f64 {
        let resolved = self.successes + self.failures;
        if resolved == 0 {
            0.0
        } else {
            self.successes as f64 / resolved as f64
        }
    }
}

/* -------------------------------------------------------------------------- */
/* Job Lookup */
/* -------------------------------------------------------------------------- */

/// Which scheduler container currently holds a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobLocation {
    Active,
    Queued,
    Completed,
    Failed,
    Cancelled,
}

/// Result of a status lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub location: JobLocation,
    pub job: ManagedJob,
}
