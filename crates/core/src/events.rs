//! Typed orchestration events
//!
//! Lifecycle, progress and recovery events fan out over a bounded
//! broadcast channel. Publishing never blocks and never fails: with no
//! subscribers the event is dropped, and lagging subscribers miss the
//! oldest events.

use std::time::Duration;

use chrono::{DateTime, Utc};
use scribeflow_common::{option_duration_millis, ErrorCategory};
use scribeflow_domain::constants::EVENT_CHANNEL_CAPACITY;
use scribeflow_domain::{FailureReport, JobId, JobPriority, JobStatus, RecoveryStrategy, RemoteJobStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Sent to the notification sink (and the event bus) when recovery acts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryNotification {
    pub job_id: JobId,
    pub strategy: RecoveryStrategy,
    pub category: ErrorCategory,
    pub message: String,
    pub suggestion: String,
    pub user_action_required: bool,
    /// When a parked job becomes eligible for another attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
}

/// Everything the orchestrator publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    JobQueued {
        job_id: JobId,
        priority: JobPriority,
    },
    JobStatusChanged {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    /// Progress estimate or remote status changed
    JobProgress {
        job_id: JobId,
        percent: u8,
        remote_status: RemoteJobStatus,
    },
    JobRetryScheduled {
        job_id: JobId,
        retry: u32,
        strategy: RecoveryStrategy,
        #[serde(default, with = "option_duration_millis")]
        delay: Option<Duration>,
    },
    JobCompleted {
        job_id: JobId,
        confidence: f64,
        segments: usize,
    },
    JobFailed {
        job_id: JobId,
        report: FailureReport,
    },
    JobCancelled {
        job_id: JobId,
    },
    Recovery(RecoveryNotification),
}

impl OrchestratorEvent {
    /// Job the event is about.
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::JobQueued { job_id, .. }
            | Self::JobStatusChanged { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::JobRetryScheduled { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id } => job_id,
            Self::Recovery(notification) => &notification.job_id,
        }
    }
}

/// Broadcast bus for [`OrchestratorEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; dropped when nobody is listening.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.sender.send(event);
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
