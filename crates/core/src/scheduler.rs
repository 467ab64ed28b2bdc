//! Priority job scheduler
//!
//! The scheduler owns every managed job. A job lives in exactly one of five
//! containers at any time:
//!
//! ```text
//! submit ─> queued ──tick──> active ──> completed
//!              │               │ ╰────> failed
//!              ╰───cancel──────┴──────> cancelled
//! ```
//!
//! All containers sit behind a single lock, so moves between them are
//! atomic. `tick` dispatches queued jobs by priority (then submission
//! order) while concurrency slots are free, and spawns one pipeline task
//! per dispatched job:
//!
//! 1. submit through the gateway (skipped when the job already has an
//!    external id, e.g. after a restart)
//! 2. monitor remote progress
//! 3. collect the result
//!
//! Failures go to the [`RecoveryOrchestrator`]; a retry decision re-enters
//! the pipeline inside the same slot after the chosen delay.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scribeflow_common::{Clock, ErrorCategory, ServiceError, SystemClock};
use scribeflow_domain::constants::TARGET_SUBMISSION;
use scribeflow_domain::{
    FailedJobRecord, FailureReport, JobId, JobLocation, JobPriority, JobSnapshot, JobStatus,
    ManagedJob, OrchestratorError, RecoveryStrategy, RemoteJobStatus, Result, SchedulerConfig,
    SchedulerStatistics, SubmissionReceipt, TransitionError, TranscriptionRequest,
    TranscriptionResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::collector::ResultCollector;
use crate::events::{EventBus, OrchestratorEvent};
use crate::guard::ServiceGuard;
use crate::ports::{JobResubmitter, PersistenceStore, RequestValidator, SubmissionGateway};
use crate::recovery::{RecoveryDecision, RecoveryOrchestrator, SweepReport};
use crate::time::{expired, wall_now};
use crate::tracker::{MonitorOutcome, MonitorRequest, ProgressObserver, ProgressTracker, StopReason};

/// Collaborators of the job pipeline.
pub struct PipelineComponents<C: Clock + Clone = SystemClock> {
    pub gateway: Arc<dyn SubmissionGateway>,
    pub validator: Arc<dyn RequestValidator>,
    pub guard: Arc<ServiceGuard<C>>,
    pub tracker: ProgressTracker<C>,
    pub collector: ResultCollector<C>,
    pub recovery: Arc<RecoveryOrchestrator<C>>,
    pub events: EventBus,
    pub persistence: Option<Arc<dyn PersistenceStore>>,
}

/* -------------------------------------------------------------------------- */
/* Containers */
/* -------------------------------------------------------------------------- */

#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    priority: JobPriority,
    seq: u64,
    job_id: JobId,
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Max-heap: higher priority first, then earlier submission.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ActiveJob {
    job: ManagedJob,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Totals {
    submitted: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    retries: u64,
    run_time: Duration,
    run_count: u32,
    queue_wait: Duration,
    wait_count: u32,
}

/// Every job is in exactly one of these maps. Queue entries whose job is
/// no longer in `queued` are stale and skipped.
#[derive(Default)]
struct Containers {
    queue: BinaryHeap<QueueEntry>,
    queued: HashMap<JobId, ManagedJob>,
    active: HashMap<JobId, ActiveJob>,
    completed: HashMap<JobId, ManagedJob>,
    failed: HashMap<JobId, ManagedJob>,
    cancelled: HashMap<JobId, ManagedJob>,
    next_seq: u64,
    totals: Totals,
}

impl Containers {
    fn contains(&self, id: &JobId) -> bool {
        self.queued.contains_key(id)
            || self.active.contains_key(id)
            || self.completed.contains_key(id)
            || self.failed.contains_key(id)
            || self.cancelled.contains_key(id)
    }

    fn push_queued(&mut self, job: ManagedJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueueEntry { priority: job.priority(), seq, job_id: job.id().clone() });
        self.queued.insert(job.id().clone(), job);
    }

    /// File a terminal job into its container and update the totals.
    fn file_terminal(&mut self, job: ManagedJob) {
        let id = job.id().clone();
        match job.status() {
            JobStatus::Completed => {
                self.totals.completed += 1;
                if let Some(run_time) = job.run_time() {
                    self.totals.run_time += run_time;
                    self.totals.run_count += 1;
                }
                self.completed.insert(id, job);
            }
            JobStatus::Failed => {
                self.totals.failed += 1;
                self.failed.insert(id, job);
            }
            JobStatus::Cancelled => {
                self.totals.cancelled += 1;
                self.cancelled.insert(id, job);
            }
            JobStatus::Pending | JobStatus::Submitted | JobStatus::Processing => {
                error!(job_id = %id, status = %job.status(), "Refusing to file a non-terminal job");
            }
        }
    }
}

/* -------------------------------------------------------------------------- */
/* Scheduler */
/* -------------------------------------------------------------------------- */

struct Inner<C: Clock + Clone> {
    config: SchedulerConfig,
    state: Mutex<Containers>,
    components: PipelineComponents<C>,
    shutdown: CancellationToken,
    clock: C,
}

/// Priority scheduler with bounded concurrency. Cheap to clone.
pub struct JobScheduler<C: Clock + Clone = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock + Clone> Clone for JobScheduler<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock + Clone> JobScheduler<C> {
    /// Create a scheduler over `components`. Nothing runs until [`tick`](Self::tick).
    pub fn new(config: SchedulerConfig, components: PipelineComponents<C>, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(Containers::default()),
                components,
                shutdown: CancellationToken::new(),
                clock,
            }),
        }
    }

    /// Scheduler limits.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Validate and queue a request.
    ///
    /// # Errors
    ///
    /// - `QueueFull` when the queue is at capacity
    /// - `Validation` when the validator rejects the request
    #[instrument(skip(self, request, config), fields(name = %request.display_name))]
    pub async fn submit(
        &self,
        request: TranscriptionRequest,
        priority: JobPriority,
        config: serde_json::Value,
    ) -> Result<JobId> {
        self.inner.ensure_capacity()?;

        let outcome = self.inner.components.validator.validate(&request);
        if !outcome.is_valid() {
            warn!(errors = ?outcome.errors, "Request rejected by validation");
            return Err(OrchestratorError::Validation { errors: outcome.errors });
        }

        let job = ManagedJob::new(request, priority, config, wall_now(&self.inner.clock));
        self.inner.enqueue(job).await
    }

    /// Look a job up in every container.
    pub fn status(&self, id: &JobId) -> Option<JobSnapshot> {
        let state = self.inner.state.lock();
        let (location, job) = if let Some(active) = state.active.get(id) {
            (JobLocation::Active, &active.job)
        } else if let Some(job) = state.queued.get(id) {
            (JobLocation::Queued, job)
        } else if let Some(job) = state.completed.get(id) {
            (JobLocation::Completed, job)
        } else if let Some(job) = state.failed.get(id) {
            (JobLocation::Failed, job)
        } else if let Some(job) = state.cancelled.get(id) {
            (JobLocation::Cancelled, job)
        } else {
            return None;
        };
        Some(JobSnapshot { location, job: job.clone() })
    }

    /// Cancel a queued or active job. Returns `false` for unknown or
    /// already terminal jobs.
    ///
    /// An in-flight remote call is not aborted; its eventual response is
    /// discarded.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &JobId) -> bool {
        let now = wall_now(&self.inner.clock);
        let (from, job) = {
            let mut state = self.inner.state.lock();
            let (from, job) = if let Some(job) = state.queued.remove(id) {
                (job.status(), job)
            } else if let Some(active) = state.active.remove(id) {
                active.cancel.cancel();
                (active.job.status(), active.job)
            } else {
                return false;
            };
            match job.clone().cancel(now) {
                Ok(cancelled) => {
                    state.file_terminal(cancelled.clone());
                    (from, cancelled)
                }
                Err(e) => {
                    error!(error = %e, "Cancel transition rejected");
                    state.file_terminal(job);
                    return false;
                }
            }
        };

        info!(from = %from, "Job cancelled");
        self.inner.publish_transition(from, &job);
        self.inner.components.events.publish(OrchestratorEvent::JobCancelled { job_id: id.clone() });
        self.inner.persist(&job).await;
        self.inner.components.recovery.release(&job).await;
        true
    }

    /// Dispatch queued jobs while concurrency slots are free. Returns the
    /// number of jobs started.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn tick(&self) -> usize {
        if self.inner.shutdown.is_cancelled() {
            return 0;
        }
        let now = wall_now(&self.inner.clock);
        let mut started = Vec::new();

        {
            let mut state = self.inner.state.lock();
            while state.active.len() < self.inner.config.max_concurrent_jobs {
                let Some(entry) = state.queue.pop() else {
                    break;
                };
                let Some(job) = state.queued.remove(&entry.job_id) else {
                    continue;
                };
                let from = job.status();
                let job = if from == JobStatus::Pending {
                    match job.clone().mark_submitted(now) {
                        Ok(job) => job,
                        Err(e) => {
                            error!(error = %e, "Dispatch transition rejected");
                            state.queued.insert(job.id().clone(), job);
                            continue;
                        }
                    }
                } else {
                    job
                };

                if from == JobStatus::Pending {
                    if let Some(wait) = job.queue_wait() {
                        state.totals.queue_wait += wait;
                        state.totals.wait_count += 1;
                    }
                }

                let cancel = self.inner.shutdown.child_token();
                state.active.insert(job.id().clone(), ActiveJob { job: job.clone(), cancel: cancel.clone() });
                started.push((from, job, cancel));
            }
        }

        let count = started.len();
        for (from, job, cancel) in started {
            debug!(job_id = %job.id(), priority = %job.priority(), "Dispatching job");
            self.inner.publish_transition(from, &job);
            tokio::spawn(Arc::clone(&self.inner).run_pipeline(job.id().clone(), cancel));
        }
        count
    }

    /// Evict terminal jobs older than the retention period. Returns the
    /// number of jobs removed.
    pub async fn cleanup(&self) -> usize {
        let now = wall_now(&self.inner.clock);
        let retention = self.inner.config.retention;
        let evicted: Vec<JobId> = {
            let mut state = self.inner.state.lock();
            let Containers { completed, failed, cancelled, .. } = &mut *state;
            let mut evicted = Vec::new();
            for container in [completed, failed, cancelled] {
                container.retain(|id, job| {
                    let keep = !job.completed_at().is_some_and(|at| expired(at, retention, now));
                    if !keep {
                        evicted.push(id.clone());
                    }
                    keep
                });
            }
            evicted
        };

        if let Some(store) = &self.inner.components.persistence {
            for id in &evicted {
                if let Err(e) = store.remove_job(id).await {
                    warn!(job_id = %id, error = %e, "Failed to remove evicted job");
                }
            }
        }
        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "Evicted terminal jobs past retention");
        }
        evicted.len()
    }

    /// Counters and current queue/active sizes.
    pub fn statistics(&self) -> SchedulerStatistics {
        let state = self.inner.state.lock();
        let totals = &state.totals;
        let max_concurrent = self.inner.config.max_concurrent_jobs;
        let resolved = totals.completed + totals.failed;

        SchedulerStatistics {
            active: state.active.len(),
            queued: state.queued.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            cancelled: state.cancelled.len(),
            total_submitted: totals.submitted,
            total_completed: totals.completed,
            total_failed: totals.failed,
            total_cancelled: totals.cancelled,
            total_retries: totals.retries,
            success_rate: if resolved == 0 { 0.0 } else { totals.completed as f64 / resolved as f64 },
            average_duration: (totals.run_count > 0).then(|| totals.run_time / totals.run_count),
            average_queue_wait: (totals.wait_count > 0).then(|| totals.queue_wait / totals.wait_count),
            utilization: state.active.len() as f64 / max_concurrent.max(1) as f64,
            max_concurrent,
        }
    }

    /// Re-queue non-terminal jobs from the persistence store. Jobs that
    /// already have an external id resume monitoring when dispatched.
    pub async fn restore(&self) -> Result<usize> {
        let Some(store) = &self.inner.components.persistence else {
            return Ok(0);
        };
        let jobs = store.load_jobs().await?;

        let mut restored = 0;
        {
            let mut state = self.inner.state.lock();
            for job in jobs.into_iter().filter(|job| !job.is_terminal()) {
                if state.contains(job.id()) {
                    continue;
                }
                state.push_queued(job);
                restored += 1;
            }
        }
        info!(restored, "Restored unfinished jobs");
        Ok(restored)
    }

    /// Run one recovery sweep with this scheduler as the resubmitter.
    pub async fn run_recovery_sweep(&self) -> SweepReport {
        self.inner.components.recovery.sweep(self).await
    }

    /// Stop dispatching and cancel every pipeline task. Jobs keep their
    /// current status so they can be restored later.
    pub fn shutdown(&self) {
        info!("Scheduler shutting down");
        self.inner.shutdown.cancel();
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OrchestratorEvent> {
        self.inner.components.events.subscribe()
    }
}

#[async_trait]
impl<C: Clock + Clone> JobResubmitter for JobScheduler<C> {
    async fn resubmit(&self, record: &FailedJobRecord) -> Result<JobId> {
        self.inner.ensure_capacity()?;
        let job = ManagedJob::new(
            record.job.request().clone(),
            record.job.priority(),
            record.job.config().clone(),
            wall_now(&self.inner.clock),
        )
        .recovering(record.lineage_root().clone());
        self.inner.enqueue(job).await
    }
}

/* -------------------------------------------------------------------------- */
/* Pipeline */
/* -------------------------------------------------------------------------- */

/// Result of one pass through the pipeline.
enum Step {
    /// The job reached a terminal container or left the active set.
    Done,
    /// The pass failed and needs a recovery decision.
    Failed(ServiceError),
}

impl<C: Clock + Clone> Inner<C> {
    fn ensure_capacity(&self) -> Result<()> {
        let state = self.state.lock();
        if state.queued.len() >= self.config.max_queue_size {
            warn!(capacity = self.config.max_queue_size, "Job queue is full");
            return Err(OrchestratorError::QueueFull { capacity: self.config.max_queue_size });
        }
        Ok(())
    }

    async fn enqueue(&self, job: ManagedJob) -> Result<JobId> {
        let id = job.id().clone();
        let priority = job.priority();
        {
            let mut state = self.state.lock();
            if state.queued.len() >= self.config.max_queue_size {
                return Err(OrchestratorError::QueueFull { capacity: self.config.max_queue_size });
            }
            state.totals.submitted += 1;
            state.push_queued(job.clone());
        }

        info!(job_id = %id, priority = %priority, "Job queued");
        self.components.events.publish(OrchestratorEvent::JobQueued { job_id: id.clone(), priority });
        self.persist(&job).await;
        Ok(id)
    }

    async fn run_pipeline(self: Arc<Self>, job_id: JobId, cancel: CancellationToken) {
        if let Some(job) = self.active_job(&job_id) {
            self.persist(&job).await;
        }

        loop {
            let Some(job) = self.active_job(&job_id) else {
                return;
            };

            let error = match self.run_pass(job, &cancel).await {
                Step::Done => return,
                Step::Failed(error) => error,
            };
            if cancel.is_cancelled() {
                return;
            }
            let Some(job) = self.active_job(&job_id) else {
                return;
            };

            match self.components.recovery.handle_failure(&job, &error).await {
                RecoveryDecision::Retry { strategy, delay } => {
                    if !self.begin_retry(&job_id, &error, strategy, delay).await {
                        return;
                    }
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RecoveryDecision::Parked { report, .. } => {
                    // Cancelled while parking: the record must not outlive the job.
                    if !self.finish_failed(&job_id, report).await {
                        self.components.recovery.release(&job).await;
                    }
                    return;
                }
                RecoveryDecision::Abandon { report, .. } => {
                    self.finish_failed(&job_id, report).await;
                    return;
                }
            }
        }
    }

    async fn run_pass(&self, job: ManagedJob, cancel: &CancellationToken) -> Step {
        let job_id = job.id().clone();

        let job = if job.external_id().is_some() {
            job
        } else {
            let receipt = match self.submit_remote(&job, cancel).await {
                Ok(receipt) => receipt,
                Err(ServiceError::Cancelled) => return Step::Done,
                Err(error) => return Step::Failed(error),
            };
            if let Some(quota) = receipt.quota {
                self.components.guard.limiter().update_quota_usage(quota.used, quota.limit);
            }
            let now = wall_now(&self.clock);
            match self.update_active(&job_id, |job| job.mark_processing(receipt.external_id.clone(), now)) {
                Some(job) => job,
                None => return Step::Done,
            }
        };

        let Some(external_id) = job.external_id().map(str::to_string) else {
            return Step::Failed(ServiceError::internal("job has no external id after submission"));
        };
        let now = wall_now(&self.clock);
        let elapsed = job.first_submitted_at().and_then(|at| (now - at).to_std().ok()).unwrap_or_default();
        let request = MonitorRequest {
            job_id: job_id.clone(),
            external_id: external_id.clone(),
            priority: job.priority(),
            expected_duration: job.request().expected_duration,
            elapsed,
        };
        let observer = JobObserver { inner: self };

        match self.components.tracker.monitor(&request, &observer, cancel).await {
            MonitorOutcome::Succeeded(_) => {
                match self.components.collector.collect(&external_id, job.priority(), cancel).await {
                    Ok(result) => {
                        self.finish_completed(&job_id, result).await;
                        Step::Done
                    }
                    Err(ServiceError::Cancelled) => Step::Done,
                    Err(error) => Step::Failed(error),
                }
            }
            MonitorOutcome::Failed(error) => Step::Failed(error),
            MonitorOutcome::Stopped(reason) => {
                self.finish_stopped(&job_id, reason).await;
                Step::Done
            }
            MonitorOutcome::Cancelled => Step::Done,
        }
    }

    async fn submit_remote(
        &self,
        job: &ManagedJob,
        cancel: &CancellationToken,
    ) -> std::result::Result<SubmissionReceipt, ServiceError> {
        let gateway = &self.components.gateway;
        let request = job.request();
        let config = job.config();
        self.components
            .guard
            .call(TARGET_SUBMISSION, job.priority().admission(), cancel, |credentials| async move {
                gateway.submit(request, config, &credentials).await
            })
            .await
    }

    async fn begin_retry(
        &self,
        job_id: &JobId,
        error: &ServiceError,
        strategy: RecoveryStrategy,
        delay: Duration,
    ) -> bool {
        let now = wall_now(&self.clock);
        let Some(job) = self.update_active(job_id, |job| job.retry(error.to_string(), now)) else {
            return false;
        };
        self.state.lock().totals.retries += 1;

        info!(
            job_id = %job_id,
            retry = job.retry_count(),
            strategy = %strategy,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Retrying job"
        );
        self.components.events.publish(OrchestratorEvent::JobRetryScheduled {
            job_id: job_id.clone(),
            retry: job.retry_count(),
            strategy,
            delay: Some(delay),
        });
        self.persist(&job).await;
        true
    }

    async fn finish_completed(&self, job_id: &JobId, result: TranscriptionResult) {
        let now = wall_now(&self.clock);
        let confidence = result.confidence;
        let segments = result.segments.len();
        let Some((from, job)) = self.finish(job_id, |job| job.complete(result, now)) else {
            return;
        };

        info!(job_id = %job_id, segments, confidence, "Job completed");
        self.publish_transition(from, &job);
        let completed = OrchestratorEvent::JobCompleted { job_id: job_id.clone(), confidence, segments };
        self.components.events.publish(completed);
        self.persist(&job).await;
        self.components.recovery.record_success(&job).await;
    }

    /// Fail an active job. Returns `false` when the job was no longer
    /// active, e.g. cancelled while its failure was being handled.
    async fn finish_failed(&self, job_id: &JobId, report: FailureReport) -> bool {
        let now = wall_now(&self.clock);
        let Some((from, job)) = self.finish(job_id, |job| job.fail(report.clone(), now)) else {
            return false;
        };

        warn!(job_id = %job_id, category = %report.category, message = %report.message, "Job failed");
        self.publish_transition(from, &job);
        self.components.events.publish(OrchestratorEvent::JobFailed { job_id: job_id.clone(), report });
        self.persist(&job).await;
        true
    }

    /// A safety valve stopped monitoring: fail without recovery.
    async fn finish_stopped(&self, job_id: &JobId, reason: StopReason) {
        let report = FailureReport {
            category: ErrorCategory::Service,
            message: reason.to_string(),
            retry_possible: true,
            suggested_action: Some("Check the job on the transcription service or resubmit it.".to_string()),
        };
        let snapshot = self.active_job(job_id);
        self.finish_failed(job_id, report).await;
        if let Some(job) = snapshot {
            self.components.recovery.release(&job).await;
        }
    }

    fn active_job(&self, id: &JobId) -> Option<ManagedJob> {
        self.state.lock().active.get(id).map(|active| active.job.clone())
    }

    /// Apply a transition to an active job in place.
    fn update_active<F>(&self, id: &JobId, transition: F) -> Option<ManagedJob>
    where
        F: FnOnce(ManagedJob) -> std::result::Result<ManagedJob, TransitionError>,
    {
        let (from, job) = {
            let mut state = self.state.lock();
            let active = state.active.get_mut(id)?;
            let from = active.job.status();
            match transition(active.job.clone()) {
                Ok(job) => {
                    active.job = job.clone();
                    (from, job)
                }
                Err(e) => {
                    error!(error = %e, "Transition rejected");
                    return None;
                }
            }
        };
        self.publish_transition(from, &job);
        Some(job)
    }

    /// Apply a terminal transition and move the job out of `active`.
    fn finish<F>(&self, id: &JobId, transition: F) -> Option<(JobStatus, ManagedJob)>
    where
        F: FnOnce(ManagedJob) -> std::result::Result<ManagedJob, TransitionError>,
    {
        let mut state = self.state.lock();
        let active = state.active.remove(id)?;
        let from = active.job.status();
        match transition(active.job.clone()) {
            Ok(job) => {
                state.file_terminal(job.clone());
                Some((from, job))
            }
            Err(e) => {
                error!(error = %e, "Terminal transition rejected");
                state.active.insert(id.clone(), active);
                None
            }
        }
    }

    fn publish_transition(&self, from: JobStatus, job: &ManagedJob) {
        if from != job.status() {
            self.components.events.publish(OrchestratorEvent::JobStatusChanged {
                job_id: job.id().clone(),
                from,
                to: job.status(),
            });
        }
    }

    async fn persist(&self, job: &ManagedJob) {
        if let Some(store) = &self.components.persistence {
            if let Err(e) = store.save_job(job).await {
                warn!(job_id = %job.id(), error = %e, "Failed to persist job");
            }
        }
    }
}

/// Feeds tracker callbacks into the active job and the event bus.
struct JobObserver<'a, C: Clock + Clone> {
    inner: &'a Inner<C>,
}

impl<C: Clock + Clone> ProgressObserver for JobObserver<'_, C> {
    fn on_progress(&self, job_id: &JobId, percent: u8, remote: RemoteJobStatus) {
        if let Some(job) = self.inner.update_active(job_id, |job| job.record_progress(percent)) {
            self.inner.components.events.publish(OrchestratorEvent::JobProgress {
                job_id: job_id.clone(),
                percent: job.progress(),
                remote_status: remote,
            });
        }
    }

    fn on_status_change(&self, job_id: &JobId, from: Option<RemoteJobStatus>, to: RemoteJobStatus) {
        debug!(job_id = %job_id, from = ?from, to = %to, "Remote status changed");
    }
}

#[cfg(test)]
mod tests {
    use scribeflow_common::MockClock;
    use scribeflow_domain::{CollectorConfig, RecoveryConfig, StatusReport, TrackerConfig};

    use super::*;
    use crate::ports::BasicRequestValidator;
    use crate::testing::{
        fast_retry_config, guard_with_clock, sample_request, sample_transcript, wait_until,
        InMemoryPersistenceStore, InMemoryResultFetcher, RecordingNotificationSink, ScriptedGateway,
        ScriptedStatusQuery,
    };

    struct Harness {
        scheduler: JobScheduler<MockClock>,
        clock: MockClock,
        gateway: Arc<ScriptedGateway>,
        status: Arc<ScriptedStatusQuery>,
        store: Arc<InMemoryPersistenceStore>,
    }

    fn harness(config: SchedulerConfig, status: ScriptedStatusQuery) -> Harness {
        let clock = MockClock::new();
        let gateway = Arc::new(ScriptedGateway::new());
        let status = Arc::new(status);
        let store = Arc::new(InMemoryPersistenceStore::default());
        let guard = Arc::new(guard_with_clock(clock.clone()));
        let events = EventBus::default();
        let tracker_config = TrackerConfig {
            base_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(50),
            jitter: 0.0,
            ..TrackerConfig::default()
        };
        let recovery = RecoveryOrchestrator::new(
            RecoveryConfig::default(),
            fast_retry_config(),
            config.max_retries,
            Arc::clone(guard.breakers()),
            Arc::new(RecordingNotificationSink::default()),
            events.clone(),
            clock.clone(),
        )
        .with_persistence(store.clone());

        let components = PipelineComponents {
            gateway: gateway.clone(),
            validator: Arc::new(BasicRequestValidator),
            guard: Arc::clone(&guard),
            tracker: ProgressTracker::new(tracker_config, status.clone(), Arc::clone(&guard), clock.clone()),
            collector: ResultCollector::new(
                CollectorConfig::default(),
                Arc::new(InMemoryResultFetcher::new(sample_transcript())),
                Arc::clone(&guard),
            ),
            recovery: Arc::new(recovery),
            events,
            persistence: Some(store.clone()),
        };
        Harness { scheduler: JobScheduler::new(config, components, clock.clone()), clock, gateway, status, store }
    }

    fn config(max_concurrent_jobs: usize) -> SchedulerConfig {
        SchedulerConfig { max_concurrent_jobs, max_queue_size: 10, ..SchedulerConfig::default() }
    }

    fn location(h: &Harness, id: &JobId) -> Option<JobLocation> {
        h.scheduler.status(id).map(|snapshot| snapshot.location)
    }

    async fn wait_terminal(h: &Harness, id: &JobId) -> bool {
        wait_until(Duration::from_secs(30), || h.scheduler.status(id).is_some_and(|s| s.job.is_terminal())).await
    }

    // ===== Submission Tests =====

    #[tokio::test(start_paused = true)]
    async fn test_submit_queues_job() {
        let h = harness(config(2), ScriptedStatusQuery::succeeding());
        let mut rx = h.scheduler.subscribe();

        let id = h.scheduler.submit(sample_request("a"), JobPriority::Normal, serde_json::Value::Null).await.unwrap();

        let snapshot = h.scheduler.status(&id).unwrap();
        assert_eq!(snapshot.location, JobLocation::Queued);
        assert_eq!(snapshot.job.status(), JobStatus::Pending);
        assert!(matches!(rx.recv().await.unwrap(), OrchestratorEvent::JobQueued { .. }));
        assert!(h.store.job(&id).is_some());
        assert_eq!(h.scheduler.statistics().total_submitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_rejects() {
        let h = harness(SchedulerConfig { max_queue_size: 1, ..config(1) }, ScriptedStatusQuery::succeeding());
        h.scheduler.submit(sample_request("a"), JobPriority::Normal, serde_json::Value::Null).await.unwrap();

        let err =
            h.scheduler.submit(sample_request("b"), JobPriority::Urgent, serde_json::Value::Null).await.unwrap_err();

        assert_eq!(err, OrchestratorError::QueueFull { capacity: 1 });
        assert_eq!(h.scheduler.statistics().queued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_rejected() {
        let h = harness(config(1), ScriptedStatusQuery::succeeding());
        let request = TranscriptionRequest::new("bad", "en-US", vec![]);

        let err = h.scheduler.submit(request, JobPriority::Normal, serde_json::Value::Null).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Validation { .. }));
        assert_eq!(h.scheduler.statistics().queued, 0);
    }

    // ===== Dispatch Tests =====

    /// Validates the full pipeline for one job.
    ///
    /// # Test Steps
    /// 1. Submit and tick
    /// 2. Wait for the pipeline to finish
    /// 3. Check container, history, result and statistics
    #[tokio::test(start_paused = true)]
    async fn test_job_runs_to_completion() {
        let h = harness(config(2), ScriptedStatusQuery::succeeding());
        let id = h.scheduler.submit(sample_request("a"), JobPriority::High, serde_json::Value::Null).await.unwrap();

        assert_eq!(h.scheduler.tick(), 1);
        assert!(wait_terminal(&h, &id).await);

        let snapshot = h.scheduler.status(&id).unwrap();
        assert_eq!(snapshot.location, JobLocation::Completed);
        let statuses: Vec<JobStatus> = snapshot.job.history().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Pending, JobStatus::Submitted, JobStatus::Processing, JobStatus::Completed]
        );
        assert_eq!(snapshot.job.progress(), 100);
        assert_eq!(snapshot.job.result().unwrap().segments.len(), 2);

        let stats = h.scheduler.statistics();
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.active, 0);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(h.store.job(&id).unwrap().status(), JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_respects_concurrency_limit() {
        let h = harness(config(2), ScriptedStatusQuery::new(vec![StatusReport::new(RemoteJobStatus::Running)]));
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let id =
                h.scheduler.submit(sample_request(name), JobPriority::Normal, serde_json::Value::Null).await.unwrap();
            ids.push(id);
        }

        assert_eq!(h.scheduler.tick(), 2);
        assert_eq!(h.scheduler.tick(), 0);

        let stats = h.scheduler.statistics();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.queued, 1);
        assert!((stats.utilization - 1.0).abs() < f64::EPSILON);
        assert_eq!(location(&h, &ids[2]), Some(JobLocation::Queued));
        h.scheduler.shutdown();
    }

    // ===== Cancellation Tests =====

    #[tokio::test(start_paused = true)]
    async fn test_cancel_queued_job() {
        let h = harness(config(1), ScriptedStatusQuery::succeeding());
        let id = h.scheduler.submit(sample_request("a"), JobPriority::Normal, serde_json::Value::Null).await.unwrap();

        assert!(h.scheduler.cancel(&id).await);
        assert!(!h.scheduler.cancel(&id).await);

        assert_eq!(location(&h, &id), Some(JobLocation::Cancelled));
        assert_eq!(h.scheduler.tick(), 0);
        assert_eq!(h.gateway.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_active_job_discards_late_result() {
        let h = harness(config(1), ScriptedStatusQuery::new(vec![StatusReport::new(RemoteJobStatus::Running)]));
        let id = h.scheduler.submit(sample_request("a"), JobPriority::Normal, serde_json::Value::Null).await.unwrap();
        h.scheduler.tick();
        assert!(wait_until(Duration::from_secs(5), || h.status.calls() > 0).await);

        assert!(h.scheduler.cancel(&id).await);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snapshot = h.scheduler.status(&id).unwrap();
        assert_eq!(snapshot.location, JobLocation::Cancelled);
        assert_eq!(snapshot.job.history().last().unwrap().status, JobStatus::Cancelled);
        assert_eq!(h.scheduler.statistics().active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_job() {
        let h = harness(config(1), ScriptedStatusQuery::succeeding());
        assert!(!h.scheduler.cancel(&JobId::from("missing")).await);
    }

    // ===== Failure Tests =====

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_retries_then_completes() {
        let h = harness(
            config(1),
            ScriptedStatusQuery::new(vec![
                StatusReport::new(RemoteJobStatus::Running),
                StatusReport::new(RemoteJobStatus::Succeeded),
            ]),
        );
        // Both poll attempts of the first pass fail, exhausting the call budget
        h.status.fail_next(ServiceError::remote_status(503, "service unavailable"));
        h.status.fail_next(ServiceError::remote_status(503, "service unavailable"));
        let id = h.scheduler.submit(sample_request("a"), JobPriority::Normal, serde_json::Value::Null).await.unwrap();

        h.scheduler.tick();
        assert!(wait_terminal(&h, &id).await);

        let job = h.scheduler.status(&id).unwrap().job;
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.retry_count(), 1);
        assert_eq!(h.gateway.calls(), 2);
        assert_eq!(h.scheduler.statistics().total_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_failure_needs_user() {
        let h = harness(
            config(1),
            ScriptedStatusQuery::new(vec![StatusReport::new(RemoteJobStatus::Failed)
                .with_failure(Some("InvalidAudioFormat".into()), "unsupported codec")]),
        );
        let mut rx = h.scheduler.subscribe();
        let id = h.scheduler.submit(sample_request("a"), JobPriority::Normal, serde_json::Value::Null).await.unwrap();

        h.scheduler.tick();
        assert!(wait_terminal(&h, &id).await);

        let job = h.scheduler.status(&id).unwrap().job;
        assert_eq!(job.status(), JobStatus::Failed);
        let report = job.error().unwrap();
        assert_eq!(report.category, ErrorCategory::Audio);
        assert!(!report.retry_possible);
        assert_eq!(job.retry_count(), 0);

        let mut saw_failed = false;
        while let Ok(event) = rx.try_recv() {
            saw_failed |= matches!(event, OrchestratorEvent::JobFailed { .. });
        }
        assert!(saw_failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_valve_fails_without_retry() {
        let mut h = harness(config(1), ScriptedStatusQuery::new(vec![StatusReport::new(RemoteJobStatus::Running)]));
        // Rebuild the tracker with a tight poll budget
        let clock = h.clock.clone();
        let guard = Arc::new(guard_with_clock(clock.clone()));
        let tracker_config = TrackerConfig {
            max_poll_attempts: 3,
            base_interval: Duration::from_millis(10),
            jitter: 0.0,
            ..TrackerConfig::default()
        };
        let events = EventBus::default();
        let components = PipelineComponents {
            gateway: h.gateway.clone(),
            validator: Arc::new(BasicRequestValidator),
            guard: Arc::clone(&guard),
            tracker: ProgressTracker::new(tracker_config, h.status.clone(), Arc::clone(&guard), clock.clone()),
            collector: ResultCollector::new(
                CollectorConfig::default(),
                Arc::new(InMemoryResultFetcher::new(sample_transcript())),
                Arc::clone(&guard),
            ),
            recovery: Arc::new(RecoveryOrchestrator::new(
                RecoveryConfig::default(),
                fast_retry_config(),
                3,
                Arc::clone(guard.breakers()),
                Arc::new(RecordingNotificationSink::default()),
                events.clone(),
                clock.clone(),
            )),
            events,
            persistence: None,
        };
        h.scheduler = JobScheduler::new(config(1), components, clock);

        let id = h.scheduler.submit(sample_request("a"), JobPriority::Normal, serde_json::Value::Null).await.unwrap();
        h.scheduler.tick();
        assert!(wait_terminal(&h, &id).await);

        let job = h.scheduler.status(&id).unwrap().job;
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.retry_count(), 0);
        assert!(job.error().unwrap().message.contains("3 status polls"));
        assert_eq!(h.status.calls(), 3);
    }

    // ===== Maintenance Tests =====

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_evicts_after_retention() {
        let h = harness(
            SchedulerConfig { retention: Duration::from_secs(60), ..config(1) },
            ScriptedStatusQuery::succeeding(),
        );
        let id = h.scheduler.submit(sample_request("a"), JobPriority::Normal, serde_json::Value::Null).await.unwrap();
        assert!(h.scheduler.cancel(&id).await);

        assert_eq!(h.scheduler.cleanup().await, 0);
        h.clock.advance(Duration::from_secs(61));
        assert_eq!(h.scheduler.cleanup().await, 1);

        assert!(h.scheduler.status(&id).is_none());
        assert!(h.store.job(&id).is_none());
        // Lifetime totals survive eviction
        assert_eq!(h.scheduler.statistics().total_cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_resumes_monitoring() {
        let h = harness(config(1), ScriptedStatusQuery::succeeding());
        let now = wall_now(&h.clock);
        let job = ManagedJob::new(sample_request("restored"), JobPriority::Normal, serde_json::Value::Null, now)
            .mark_submitted(now)
            .and_then(|j| j.mark_processing("remote-previous", now))
            .unwrap();
        let id = job.id().clone();
        h.store.seed_job(job);

        assert_eq!(h.scheduler.restore().await.unwrap(), 1);
        assert_eq!(h.scheduler.restore().await.unwrap(), 0);
        h.scheduler.tick();
        assert!(wait_terminal(&h, &id).await);

        assert_eq!(h.scheduler.status(&id).unwrap().job.status(), JobStatus::Completed);
        assert_eq!(h.gateway.calls(), 0);
        assert!(h.status.calls_for("remote-previous") > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_job_in_one_container() {
        let h = harness(config(1), ScriptedStatusQuery::succeeding());
        let a = h.scheduler.submit(sample_request("a"), JobPriority::Normal, serde_json::Value::Null).await.unwrap();
        let b = h.scheduler.submit(sample_request("b"), JobPriority::Normal, serde_json::Value::Null).await.unwrap();
        h.scheduler.tick();

        let state = h.scheduler.inner.state.lock();
        for id in [&a, &b] {
            let hits = [
                state.queued.contains_key(id),
                state.active.contains_key(id),
                state.completed.contains_key(id),
                state.failed.contains_key(id),
                state.cancelled.contains_key(id),
            ]
            .into_iter()
            .filter(|hit| *hit)
            .count();
            assert_eq!(hits, 1);
        }
    }
}
