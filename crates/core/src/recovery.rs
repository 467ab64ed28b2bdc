//! Recovery orchestration for failed jobs
//!
//! The scheduler hands every job-level failure to
//! [`RecoveryOrchestrator::handle_failure`], which classifies the error,
//! consults the circuit breakers and picks a [`RecoveryStrategy`]:
//!
//! | Situation | Strategy |
//! |-----------|----------|
//! | error needs user action | `UserIntervention` |
//! | job retries exhausted, lineage has attempts left | `Persist` |
//! | job retries exhausted, lineage out of attempts | `GracefulDegradation` |
//! | circuit open (error or breaker state) | `CircuitBreakerWait` |
//! | estimated delay at or below the immediate threshold | `ImmediateRetry` |
//! | estimated delay above the inline maximum | `Persist` |
//! | otherwise | `DelayedRetry` |
//!
//! Parked jobs are kept in a bounded record store (and the persistence
//! store, when configured) keyed by the first job of their lineage. A
//! periodic [`sweep`](RecoveryOrchestrator::sweep) resubmits due records
//! through a [`JobResubmitter`] and evicts records past their retention.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scribeflow_common::resilience::{CircuitBreakerRegistry, CircuitState, RetryConfig};
use scribeflow_common::{
    classify, Classify, Clock, ErrorCategory, ErrorClassification, RetryStrategy, ServiceError,
    SystemClock,
};
use scribeflow_domain::{
    FailedJobRecord, FailureReport, JobId, ManagedJob, RecoveryConfig, RecoveryStatistics,
    RecoveryStrategy, Result,
};
use tracing::{debug, info, instrument, warn};

use crate::events::{EventBus, OrchestratorEvent, RecoveryNotification};
use crate::ports::{JobResubmitter, NotificationSink, PersistenceStore};
use crate::time::{after, expired, wall_now};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// What the scheduler should do with a failed job.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryDecision {
    /// Re-enter the pipeline after `delay`, keeping the concurrency slot.
    Retry { strategy: RecoveryStrategy, delay: Duration },
    /// Fail the job; a fresh job is resubmitted by a later sweep.
    Parked { retry_after: DateTime<Utc>, report: FailureReport },
    /// Fail the job for good.
    Abandon { strategy: RecoveryStrategy, report: FailureReport },
}

/// Outcome of one recovery sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub resubmitted: usize,
    /// Due records the resubmitter refused; retried next sweep
    pub deferred: usize,
    /// Records dropped after their retention
    pub evicted: usize,
}

/// Chooses and applies recovery strategies.
pub struct RecoveryOrchestrator<C: Clock + Clone = SystemClock> {
    config: RecoveryConfig,
    retry: RetryConfig,
    max_retries: u32,
    breakers: Arc<CircuitBreakerRegistry<C>>,
    records: Mutex<HashMap<JobId, FailedJobRecord>>,
    stats: Mutex<RecoveryStatistics>,
    notifier: Arc<dyn NotificationSink>,
    events: EventBus,
    persistence: Option<Arc<dyn PersistenceStore>>,
    clock: C,
}

impl<C: Clock + Clone> RecoveryOrchestrator<C> {
    /// `max_retries` is the scheduler's per-job retry budget.
    pub fn new(
        config: RecoveryConfig,
        retry: RetryConfig,
        max_retries: u32,
        breakers: Arc<CircuitBreakerRegistry<C>>,
        notifier: Arc<dyn NotificationSink>,
        events: EventBus,
        clock: C,
    ) -> Self {
        Self {
            config,
            retry,
            max_retries,
            breakers,
            records: Mutex::new(HashMap::new()),
            stats: Mutex::new(RecoveryStatistics::default()),
            notifier,
            events,
            persistence: None,
            clock,
        }
    }

    /// Mirror parked records into `store`.
    #[must_use]
    pub fn with_persistence(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    /// Recovery configuration.
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Decide what happens to `job` after `error`.
    ///
    /// `job` is the snapshot before it is failed or retried.
    #[instrument(skip(self, job, error), fields(job_id = %job.id(), retry_count = job.retry_count()))]
    pub async fn handle_failure(&self, job: &ManagedJob, error: &ServiceError) -> RecoveryDecision {
        let classification = classify(error);
        let (strategy, delay) = self.select_strategy(job, error, &classification);

        {
            let mut stats = self.stats.lock();
            stats.attempts += 1;
            *stats.by_strategy.entry(strategy).or_insert(0) += 1;
        }
        info!(
            category = %classification.category,
            strategy = %strategy,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Recovery strategy selected"
        );

        match strategy {
            RecoveryStrategy::ImmediateRetry
            | RecoveryStrategy::DelayedRetry
            | RecoveryStrategy::CircuitBreakerWait => RecoveryDecision::Retry { strategy, delay },
            RecoveryStrategy::Persist => self.park(job, error, classification, delay).await,
            RecoveryStrategy::UserIntervention | RecoveryStrategy::GracefulDegradation => {
                self.abandon(job, error, &classification, strategy).await
            }
        }
    }

    /// Strategy and estimated delay for a failure.
    fn select_strategy(
        &self,
        job: &ManagedJob,
        error: &ServiceError,
        classification: &ErrorClassification,
    ) -> (RecoveryStrategy, Duration) {
        if classification.requires_user_intervention {
            return (RecoveryStrategy::UserIntervention, Duration::ZERO);
        }

        if job.retry_count() >= self.max_retries {
            return (self.park_or_degrade(job), classification.estimated_recovery);
        }

        let open_wait = match classification.category {
            ErrorCategory::CircuitOpen => Some(
                error.retry_after().or_else(|| self.open_circuit_wait()).unwrap_or(classification.estimated_recovery),
            ),
            ErrorCategory::Network | ErrorCategory::Service => self.open_circuit_wait(),
            _ => None,
        };
        if let Some(wait) = open_wait {
            return if wait > self.config.max_inline_delay {
                (self.park_or_degrade(job), wait)
            } else {
                (RecoveryStrategy::CircuitBreakerWait, wait)
            };
        }

        let delay = match classification.strategy {
            RetryStrategy::Immediate => Duration::ZERO,
            strategy => {
                let computed = self.retry.delay_for(strategy, job.retry_count() + 1);
                error.retry_after().map_or(computed, |hint| hint.max(computed))
            }
        };

        if delay <= self.config.immediate_retry_threshold {
            (RecoveryStrategy::ImmediateRetry, Duration::ZERO)
        } else if delay > self.config.max_inline_delay {
            (self.park_or_degrade(job), delay)
        } else {
            (RecoveryStrategy::DelayedRetry, delay)
        }
    }

    /// `Persist` while the lineage has attempts left.
    fn park_or_degrade(&self, job: &ManagedJob) -> RecoveryStrategy {
        let attempts = self.lineage_attempts(job).max(1);
        if attempts < self.config.max_recovery_attempts {
            RecoveryStrategy::Persist
        } else {
            RecoveryStrategy::GracefulDegradation
        }
    }

    fn lineage_attempts(&self, job: &ManagedJob) -> u32 {
        job.recovered_from().and_then(|root| self.records.lock().get(root).map(|r| r.attempts)).unwrap_or(0)
    }

    /// Longest remaining open time among open circuits.
    fn open_circuit_wait(&self) -> Option<Duration> {
        self.breakers
            .metrics()
            .into_iter()
            .filter(|(_, metrics)| metrics.state == CircuitState::Open)
            .map(|(target, metrics)| {
                self.breakers.get(&target).config().timeout.saturating_sub(metrics.since_last_transition)
            })
            .max()
    }

    async fn park(
        &self,
        job: &ManagedJob,
        error: &ServiceError,
        classification: ErrorClassification,
        delay: Duration,
    ) -> RecoveryDecision {
        let now = wall_now(&self.clock);
        let retry_after = after(now, delay.max(classification.estimated_recovery));
        let root = job.recovered_from().cloned().unwrap_or_else(|| job.id().clone());

        let report = FailureReport {
            category: classification.category,
            message: error.to_string(),
            retry_possible: true,
            suggested_action: Some(format!(
                "{} The job will be re-attempted after {retry_after}.",
                classification.suggestion
            )),
        };

        let (record, evicted) = {
            let mut records = self.records.lock();
            let attempts = records.get(&root).map_or(1, |existing| existing.attempts);
            let record = FailedJobRecord {
                job: job.clone(),
                error: error.clone(),
                classification: classification.clone(),
                attempts,
                retry_after,
                failed_at: now,
                resubmitted_as: None,
            };
            records.insert(root.clone(), record.clone());
            let evicted = evict_oldest(&mut records, self.config.max_failed_records, &root);
            (record, evicted)
        };

        if let Some(store) = &self.persistence {
            if let Err(e) = store.save_failed(&record).await {
                warn!(error = %e, "Failed to persist parked job");
            }
            for id in &evicted {
                if let Err(e) = store.remove_failed(id).await {
                    warn!(job_id = %id, error = %e, "Failed to remove evicted record");
                }
            }
        }
        if !evicted.is_empty() {
            warn!(evicted = evicted.len(), "Parked-record store full; oldest records evicted");
            self.stats.lock().failures += evicted.len() as u64;
        }

        self.notify(RecoveryNotification {
            job_id: job.id().clone(),
            strategy: RecoveryStrategy::Persist,
            category: classification.category,
            message: report.message.clone(),
            suggestion: classification.suggestion,
            user_action_required: false,
            retry_after: Some(retry_after),
        })
        .await;

        RecoveryDecision::Parked { retry_after, report }
    }

    async fn abandon(
        &self,
        job: &ManagedJob,
        error: &ServiceError,
        classification: &ErrorClassification,
        strategy: RecoveryStrategy,
    ) -> RecoveryDecision {
        self.release(job).await;
        self.stats.lock().failures += 1;

        let user_action_required = strategy == RecoveryStrategy::UserIntervention;
        let report = FailureReport {
            category: classification.category,
            message: error.to_string(),
            retry_possible: !user_action_required && classification.retryable,
            suggested_action: Some(classification.suggestion.clone()),
        };

        self.notify(RecoveryNotification {
            job_id: job.id().clone(),
            strategy,
            category: classification.category,
            message: report.message.clone(),
            suggestion: classification.suggestion.clone(),
            user_action_required,
            retry_after: None,
        })
        .await;

        RecoveryDecision::Abandon { strategy, report }
    }

    /// Account for a job that completed. Counts a recovery success when the
    /// job was retried or resubmitted, and closes its lineage record.
    pub async fn record_success(&self, job: &ManagedJob) {
        if job.retry_count() > 0 || job.recovered_from().is_some() {
            self.stats.lock().successes += 1;
        }
        self.release(job).await;
    }

    /// Drop the lineage record of `job`, if any. Used when a job ends
    /// outside recovery (cancelled, stopped by a safety valve).
    ///
    /// A first-generation job is its own lineage root.
    pub async fn release(&self, job: &ManagedJob) {
        let root = job.recovered_from().unwrap_or_else(|| job.id());
        let removed = self.records.lock().remove(root).is_some();
        if removed {
            debug!(root = %root, "Closed recovery lineage");
            if let Some(store) = &self.persistence {
                if let Err(e) = store.remove_failed(root).await {
                    warn!(root = %root, error = %e, "Failed to remove recovery record");
                }
            }
        }
    }

    /// Evict expired records and resubmit due ones.
    #[instrument(skip(self, resubmitter))]
    pub async fn sweep(&self, resubmitter: &dyn JobResubmitter) -> SweepReport {
        let now = wall_now(&self.clock);
        let mut report = SweepReport::default();

        let (due, evicted) = {
            let mut records = self.records.lock();
            let evicted: Vec<JobId> = records
                .iter()
                .filter(|(_, r)| expired(r.failed_at, self.config.record_retention, now))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &evicted {
                records.remove(id);
            }
            let due: Vec<(JobId, FailedJobRecord)> = records
                .iter()
                .filter(|(_, r)| r.is_due(now, self.config.max_recovery_attempts))
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect();
            (due, evicted)
        };

        report.evicted = evicted.len();
        if !evicted.is_empty() {
            self.stats.lock().failures += evicted.len() as u64;
            if let Some(store) = &self.persistence {
                for id in &evicted {
                    if let Err(e) = store.remove_failed(id).await {
                        warn!(job_id = %id, error = %e, "Failed to remove expired record");
                    }
                }
            }
        }

        for (root, record) in due {
            let updated = match resubmitter.resubmit(&record).await {
                Ok(new_id) => {
                    info!(root = %root, job_id = %new_id, attempt = record.attempts + 1, "Resubmitted parked job");
                    report.resubmitted += 1;
                    self.update_record(&root, |r| {
                        r.attempts += 1;
                        r.resubmitted_as = Some(new_id);
                    })
                }
                Err(e) => {
                    warn!(root = %root, error = %e, "Resubmission refused; deferring");
                    report.deferred += 1;
                    let retry_after = after(now, self.config.sweep_interval);
                    self.update_record(&root, |r| r.retry_after = retry_after)
                }
            };

            if let (Some(store), Some(record)) = (&self.persistence, updated) {
                if let Err(e) = store.save_failed(&record).await {
                    warn!(root = %root, error = %e, "Failed to persist recovery record");
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                resubmitted = report.resubmitted,
                deferred = report.deferred,
                evicted = report.evicted,
                "Recovery sweep finished"
            );
        }
        report
    }

    fn update_record(&self, root: &JobId, apply: impl FnOnce(&mut FailedJobRecord)) -> Option<FailedJobRecord> {
        let mut records = self.records.lock();
        let record = records.get_mut(root)?;
        apply(record);
        Some(record.clone())
    }

    /// Load parked records from the persistence store.
    pub async fn restore(&self) -> Result<usize> {
        let Some(store) = &self.persistence else {
            return Ok(0);
        };
        let loaded = store.load_failed().await?;
        let count = loaded.len();
        let mut records = self.records.lock();
        for record in loaded {
            records.insert(record.lineage_root().clone(), record);
        }
        info!(count, "Restored parked jobs");
        Ok(count)
    }

    /// Parked records, oldest failure first.
    pub fn records(&self) -> Vec<FailedJobRecord> {
        let mut records: Vec<_> = self.records.lock().values().cloned().collect();
        records.sort_by_key(|r| r.failed_at);
        records
    }

    /// Decision counters since start.
    pub fn statistics(&self) -> RecoveryStatistics {
        let mut stats = self.stats.lock().clone();
        stats.parked = self.records.lock().len();
        stats
    }

    async fn notify(&self, notification: RecoveryNotification) {
        self.events.publish(OrchestratorEvent::Recovery(notification.clone()));
        match tokio::time::timeout(NOTIFY_TIMEOUT, self.notifier.notify(&notification)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(job_id = %notification.job_id, error = %e, "Notification delivery failed"),
            Err(_) => warn!(job_id = %notification.job_id, "Notification delivery timed out"),
        }
    }
}

/// Remove the oldest records (by failure time) beyond `capacity`, never
/// the one just inserted.
fn evict_oldest(records: &mut HashMap<JobId, FailedJobRecord>, capacity: usize, keep: &JobId) -> Vec<JobId> {
    let mut evicted = Vec::new();
    while records.len() > capacity {
        let oldest = records
            .iter()
            .filter(|(id, _)| *id != keep)
            .min_by_key(|(_, r)| r.failed_at)
            .map(|(id, _)| id.clone());
        match oldest {
            Some(id) => {
                records.remove(&id);
                evicted.push(id);
            }
            None => break,
        }
    }
    evicted
}

#[cfg(test)]
mod tests {
    use scribeflow_common::resilience::CircuitBreakerConfig;
    use scribeflow_common::MockClock;
    use scribeflow_domain::{JobPriority, OrchestratorError, TranscriptionRequest};

    use super::*;
    use crate::testing::{InMemoryPersistenceStore, RecordingNotificationSink};

    struct CountingResubmitter {
        refuse: bool,
        calls: Mutex<Vec<JobId>>,
    }

    impl CountingResubmitter {
        fn new(refuse: bool) -> Self {
            Self { refuse, calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl JobResubmitter for CountingResubmitter {
        async fn resubmit(&self, record: &FailedJobRecord) -> Result<JobId> {
            if self.refuse {
                return Err(OrchestratorError::QueueFull { capacity: 1 });
            }
            let id = JobId::new();
            self.calls.lock().push(record.lineage_root().clone());
            Ok(id)
        }
    }

    struct Fixture {
        clock: MockClock,
        recovery: RecoveryOrchestrator<MockClock>,
        sink: Arc<RecordingNotificationSink>,
        store: Arc<InMemoryPersistenceStore>,
        events: EventBus,
    }

    fn fixture(config: RecoveryConfig, max_retries: u32) -> Fixture {
        let clock = MockClock::new();
        let breakers = Arc::new(
            CircuitBreakerRegistry::with_clock(CircuitBreakerConfig::default(), clock.clone()).unwrap(),
        );
        let retry = RetryConfig::builder().base_delay(Duration::from_secs(1)).no_jitter().build().unwrap();
        let sink = Arc::new(RecordingNotificationSink::default());
        let store = Arc::new(InMemoryPersistenceStore::default());
        let events = EventBus::default();
        let recovery =
            RecoveryOrchestrator::new(config, retry, max_retries, breakers, sink.clone(), events.clone(), clock.clone())
                .with_persistence(store.clone());
        Fixture { clock, recovery, sink, store, events }
    }

    fn running_job(clock: &MockClock) -> ManagedJob {
        let now = wall_now(clock);
        let request = TranscriptionRequest::new("a.wav", "en-US", vec!["https://a/a.wav".into()]);
        ManagedJob::new(request, JobPriority::Normal, serde_json::Value::Null, now)
            .mark_submitted(now)
            .and_then(|j| j.mark_processing("remote-1", now))
            .unwrap()
    }

    fn retried(job: ManagedJob, times: u32, clock: &MockClock) -> ManagedJob {
        (0..times).fold(job, |j, _| j.retry("again", wall_now(clock)).unwrap())
    }

    // ===== Strategy Selection Tests =====

    /// Validates that authentication failures stop for user intervention.
    ///
    /// Assertions:
    /// - Confirms the decision abandons the job with retry impossible.
    /// - Confirms a notification flagged for user action is delivered.
    #[tokio::test]
    async fn test_auth_failure_needs_user() {
        let f = fixture(RecoveryConfig::default(), 3);
        let job = running_job(&f.clock);
        let mut rx = f.events.subscribe();

        let decision = f.recovery.handle_failure(&job, &ServiceError::remote_status(401, "denied")).await;

        match decision {
            RecoveryDecision::Abandon { strategy, report } => {
                assert_eq!(strategy, RecoveryStrategy::UserIntervention);
                assert!(!report.retry_possible);
                assert!(report.suggested_action.is_some());
            }
            other => panic!("unexpected decision: {other:?}"),
        }
        let notes = f.sink.notifications();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].user_action_required);
        assert!(matches!(rx.recv().await.unwrap(), OrchestratorEvent::Recovery(_)));
        assert_eq!(f.recovery.statistics().failures, 1);
    }

    #[tokio::test]
    async fn test_network_failure_delays_retry() {
        let f = fixture(RecoveryConfig::default(), 3);
        let job = running_job(&f.clock);

        let decision = f.recovery.handle_failure(&job, &ServiceError::transport("connection reset")).await;

        assert_eq!(
            decision,
            RecoveryDecision::Retry { strategy: RecoveryStrategy::DelayedRetry, delay: Duration::from_secs(1) }
        );
        let stats = f.recovery.statistics();
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.by_strategy.get(&RecoveryStrategy::DelayedRetry), Some(&1));
    }

    #[tokio::test]
    async fn test_threshold_turns_short_delays_immediate() {
        let config = RecoveryConfig { immediate_retry_threshold: Duration::from_secs(2), ..RecoveryConfig::default() };
        let f = fixture(config, 3);
        let job = running_job(&f.clock);

        let decision = f.recovery.handle_failure(&job, &ServiceError::transport("reset")).await;

        assert_eq!(
            decision,
            RecoveryDecision::Retry { strategy: RecoveryStrategy::ImmediateRetry, delay: Duration::ZERO }
        );
    }

    #[tokio::test]
    async fn test_open_circuit_waits_for_probe() {
        let f = fixture(RecoveryConfig::default(), 3);
        let job = running_job(&f.clock);
        let error = ServiceError::CircuitOpen { target: "status".into(), retry_after: Duration::from_secs(20) };

        let decision = f.recovery.handle_failure(&job, &error).await;

        assert_eq!(
            decision,
            RecoveryDecision::Retry { strategy: RecoveryStrategy::CircuitBreakerWait, delay: Duration::from_secs(20) }
        );
    }

    #[tokio::test]
    async fn test_long_rate_limit_hint_parks_job() {
        let f = fixture(RecoveryConfig::default(), 3);
        let job = running_job(&f.clock);
        let error = ServiceError::remote_status(429, "slow down").with_retry_after(Duration::from_secs(600));

        let decision = f.recovery.handle_failure(&job, &error).await;

        let RecoveryDecision::Parked { retry_after, report } = decision else {
            panic!("expected the job to be parked");
        };
        assert!(report.retry_possible);
        assert_eq!(retry_after, after(wall_now(&f.clock), Duration::from_secs(600)));
        assert_eq!(f.recovery.records().len(), 1);
        assert_eq!(f.store.failed_records().len(), 1);
        assert_eq!(f.recovery.statistics().parked, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_park_then_degrade() {
        let config = RecoveryConfig { max_recovery_attempts: 2, ..RecoveryConfig::default() };
        let f = fixture(config, 2);
        let job = retried(running_job(&f.clock), 2, &f.clock);
        let error = ServiceError::remote_status(503, "unavailable");

        let first = f.recovery.handle_failure(&job, &error).await;
        assert!(matches!(first, RecoveryDecision::Parked { .. }));

        // The sweep resubmits once the record is due
        f.clock.advance(Duration::from_secs(3600));
        let resubmitter = CountingResubmitter::new(false);
        assert_eq!(f.recovery.sweep(&resubmitter).await.resubmitted, 1);
        let record = &f.recovery.records()[0];
        assert_eq!(record.attempts, 2);
        let new_id = record.resubmitted_as.clone().unwrap();

        // The resubmitted job exhausts its retries too: the lineage is out of attempts
        let second_job = retried(running_job(&f.clock).recovering(job.id().clone()), 2, &f.clock);
        assert_ne!(second_job.id(), &new_id);
        let second = f.recovery.handle_failure(&second_job, &error).await;
        assert!(matches!(second, RecoveryDecision::Abandon { strategy: RecoveryStrategy::GracefulDegradation, .. }));
        assert!(f.recovery.records().is_empty());
        assert!(f.store.failed_records().is_empty());
    }

    // ===== Sweep Tests =====

    #[tokio::test]
    async fn test_sweep_skips_records_not_yet_due() {
        let f = fixture(RecoveryConfig::default(), 0);
        let job = running_job(&f.clock);
        f.recovery.handle_failure(&job, &ServiceError::transport("reset")).await;

        let resubmitter = CountingResubmitter::new(false);
        assert_eq!(f.recovery.sweep(&resubmitter).await, SweepReport::default());
        assert!(resubmitter.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_refused_resubmission_is_deferred() {
        let f = fixture(RecoveryConfig::default(), 0);
        let job = running_job(&f.clock);
        f.recovery.handle_failure(&job, &ServiceError::transport("reset")).await;
        f.clock.advance(Duration::from_secs(3600));

        let report = f.recovery.sweep(&CountingResubmitter::new(true)).await;

        assert_eq!(report.deferred, 1);
        let record = &f.recovery.records()[0];
        assert_eq!(record.attempts, 1);
        assert!(record.retry_after > wall_now(&f.clock));
    }

    #[tokio::test]
    async fn test_expired_records_are_evicted() {
        let config = RecoveryConfig { record_retention: Duration::from_secs(60), ..RecoveryConfig::default() };
        let f = fixture(config, 0);
        f.recovery.handle_failure(&running_job(&f.clock), &ServiceError::transport("reset")).await;
        f.clock.advance(Duration::from_secs(61));

        let report = f.recovery.sweep(&CountingResubmitter::new(false)).await;

        assert_eq!(report.evicted, 1);
        assert_eq!(report.resubmitted, 0);
        assert!(f.store.failed_records().is_empty());
        assert_eq!(f.recovery.statistics().failures, 1);
    }

    #[tokio::test]
    async fn test_store_is_bounded() {
        let config = RecoveryConfig { max_failed_records: 2, ..RecoveryConfig::default() };
        let f = fixture(config, 0);
        let first = running_job(&f.clock);
        for job in [first.clone(), running_job(&f.clock), running_job(&f.clock)] {
            f.recovery.handle_failure(&job, &ServiceError::transport("reset")).await;
            f.clock.advance(Duration::from_secs(1));
        }

        let records = f.recovery.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.job.id() != first.id()));
    }

    #[tokio::test]
    async fn test_success_closes_lineage() {
        let f = fixture(RecoveryConfig::default(), 0);
        let job = running_job(&f.clock);
        f.recovery.handle_failure(&job, &ServiceError::transport("reset")).await;

        let resubmitted = running_job(&f.clock).recovering(job.id().clone());
        f.recovery.record_success(&resubmitted).await;

        let stats = f.recovery.statistics();
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.parked, 0);
        assert!((stats.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    /// A parked first-generation job is its own lineage root, so releasing
    /// it (e.g. after a cancel) drops its record.
    #[tokio::test]
    async fn test_release_drops_first_generation_record() {
        let f = fixture(RecoveryConfig::default(), 3);
        let job = running_job(&f.clock);
        let error = ServiceError::remote_status(429, "slow down").with_retry_after(Duration::from_secs(600));
        assert!(matches!(f.recovery.handle_failure(&job, &error).await, RecoveryDecision::Parked { .. }));

        let cancelled = job.cancel(wall_now(&f.clock)).unwrap();
        f.recovery.release(&cancelled).await;

        assert!(f.recovery.records().is_empty());
        assert!(f.store.failed_records().is_empty());
        f.clock.advance(Duration::from_secs(601));
        let resubmitter = CountingResubmitter::new(false);
        assert_eq!(f.recovery.sweep(&resubmitter).await.resubmitted, 0);
    }

    #[tokio::test]
    async fn test_failing_sink_never_fails_recovery() {
        let f = fixture(RecoveryConfig::default(), 3);
        f.sink.fail_deliveries(true);

        let error = ServiceError::remote_code("InvalidLocale", "bad");
        let decision = f.recovery.handle_failure(&running_job(&f.clock), &error).await;

        assert!(matches!(decision, RecoveryDecision::Abandon { .. }));
    }

    #[tokio::test]
    async fn test_restore_reloads_parked_records() {
        let f = fixture(RecoveryConfig::default(), 0);
        f.recovery.handle_failure(&running_job(&f.clock), &ServiceError::transport("reset")).await;

        let g = fixture(RecoveryConfig::default(), 0);
        let restored = RecoveryOrchestrator::new(
            RecoveryConfig::default(),
            RetryConfig::default(),
            0,
            Arc::new(CircuitBreakerRegistry::with_clock(CircuitBreakerConfig::default(), g.clock.clone()).unwrap()),
            g.sink.clone(),
            EventBus::default(),
            g.clock.clone(),
        )
        .with_persistence(f.store.clone());

        assert_eq!(restored.restore().await.unwrap(), 1);
        assert_eq!(restored.statistics().parked, 1);
    }
}
