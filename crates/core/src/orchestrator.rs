//! Top-level orchestration facade
//!
//! [`Orchestrator`] builds the resilience primitives and pipeline
//! components from one [`OrchestratorConfig`] and exposes the public job
//! API. Background loops (dispatch ticks, cleanup, recovery sweeps) are
//! driven by the caller; the infrastructure crate ships a driver for them.

use std::sync::Arc;

use scribeflow_common::resilience::{CircuitBreakerRegistry, RateLimiter, RetryCoordinator};
use scribeflow_common::{Clock, SystemClock};
use scribeflow_domain::{
    JobId, JobPriority, JobSnapshot, OrchestratorConfig, RecoveryStatistics, Result,
    SchedulerStatistics, TranscriptionRequest,
};
use tokio::sync::broadcast;
use tracing::info;

use crate::collector::ResultCollector;
use crate::events::{EventBus, OrchestratorEvent};
use crate::guard::ServiceGuard;
use crate::ports::{
    BasicRequestValidator, CredentialProvider, NoopNotificationSink, NotificationSink,
    PersistenceStore, RequestValidator, ResultFetcher, StatusQuery, SubmissionGateway,
};
use crate::recovery::{RecoveryOrchestrator, SweepReport};
use crate::scheduler::{JobScheduler, PipelineComponents};
use crate::tracker::ProgressTracker;

/// External services the orchestrator talks to.
pub struct Collaborators {
    pub gateway: Arc<dyn SubmissionGateway>,
    pub status: Arc<dyn StatusQuery>,
    pub fetcher: Arc<dyn ResultFetcher>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub validator: Arc<dyn RequestValidator>,
    pub notifier: Arc<dyn NotificationSink>,
    pub persistence: Option<Arc<dyn PersistenceStore>>,
}

impl Collaborators {
    /// Remote ports plus the basic validator, no notifications and no
    /// persistence.
    pub fn new(
        gateway: Arc<dyn SubmissionGateway>,
        status: Arc<dyn StatusQuery>,
        fetcher: Arc<dyn ResultFetcher>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            gateway,
            status,
            fetcher,
            credentials,
            validator: Arc::new(BasicRequestValidator),
            notifier: Arc::new(NoopNotificationSink),
            persistence: None,
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn RequestValidator>) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(store);
        self
    }
}

/// Transcription job orchestrator. Cheap to clone.
pub struct Orchestrator<C: Clock + Clone = SystemClock> {
    config: Arc<OrchestratorConfig>,
    scheduler: JobScheduler<C>,
    recovery: Arc<RecoveryOrchestrator<C>>,
    guard: Arc<ServiceGuard<C>>,
    events: EventBus,
}

impl<C: Clock + Clone> Clone for Orchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            scheduler: self.scheduler.clone(),
            recovery: Arc::clone(&self.recovery),
            guard: Arc::clone(&self.guard),
            events: self.events.clone(),
        }
    }
}

impl Orchestrator<SystemClock> {
    /// Build an orchestrator on the system clock.
    ///
    /// # Errors
    ///
    /// Returns `Config` when any component configuration is invalid.
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Result<Self> {
        Self::with_clock(config, collaborators, SystemClock)
    }
}

impl<C: Clock + Clone> Orchestrator<C> {
    /// Build an orchestrator on `clock`.
    ///
    /// # Errors
    ///
    /// Returns `Config` when any component configuration is invalid.
    pub fn with_clock(config: OrchestratorConfig, collaborators: Collaborators, clock: C) -> Result<Self> {
        config.validate()?;

        let breakers = Arc::new(CircuitBreakerRegistry::with_clock(config.circuit_breaker.clone(), clock.clone())?);
        let limiter = RateLimiter::with_clock(config.rate_limiter.clone(), clock.clone())?;
        let retry = RetryCoordinator::new(config.retry.clone())?;
        let guard = Arc::new(ServiceGuard::new(retry, limiter, Arc::clone(&breakers), collaborators.credentials));
        let events = EventBus::default();

        let mut recovery = RecoveryOrchestrator::new(
            config.recovery.clone(),
            config.retry.clone(),
            config.scheduler.max_retries,
            breakers,
            collaborators.notifier,
            events.clone(),
            clock.clone(),
        );
        if let Some(store) = &collaborators.persistence {
            recovery = recovery.with_persistence(Arc::clone(store));
        }
        let recovery = Arc::new(recovery);

        let components = PipelineComponents {
            gateway: collaborators.gateway,
            validator: collaborators.validator,
            guard: Arc::clone(&guard),
            tracker: ProgressTracker::new(
                config.tracker.clone(),
                collaborators.status,
                Arc::clone(&guard),
                clock.clone(),
            ),
            collector: ResultCollector::new(config.collector.clone(), collaborators.fetcher, Arc::clone(&guard)),
            recovery: Arc::clone(&recovery),
            events: events.clone(),
            persistence: collaborators.persistence,
        };
        let scheduler = JobScheduler::new(config.scheduler.clone(), components, clock);

        info!(
            max_concurrent = config.scheduler.max_concurrent_jobs,
            max_queue = config.scheduler.max_queue_size,
            "Orchestrator initialized"
        );
        Ok(Self { config: Arc::new(config), scheduler, recovery, guard, events })
    }

    /// The validated configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The job scheduler.
    pub fn scheduler(&self) -> &JobScheduler<C> {
        &self.scheduler
    }

    /// The recovery orchestrator holding parked records.
    pub fn recovery(&self) -> &Arc<RecoveryOrchestrator<C>> {
        &self.recovery
    }

    /// The guard shared by every outbound call.
    pub fn guard(&self) -> &Arc<ServiceGuard<C>> {
        &self.guard
    }

    /// Queue a job. See [`JobScheduler::submit`].
    pub async fn submit(
        &self,
        request: TranscriptionRequest,
        priority: JobPriority,
        config: serde_json::Value,
    ) -> Result<JobId> {
        self.scheduler.submit(request, priority, config).await
    }

    /// Snapshot of a job, or `None` if unknown or already evicted.
    pub fn status(&self, id: &JobId) -> Option<JobSnapshot> {
        self.scheduler.status(id)
    }

    /// Cancel a queued or active job. Returns `false` if it is unknown or
    /// already terminal.
    pub async fn cancel(&self, id: &JobId) -> bool {
        self.scheduler.cancel(id).await
    }

    /// Scheduler counters.
    pub fn statistics(&self) -> SchedulerStatistics {
        self.scheduler.statistics()
    }

    /// Recovery counters.
    pub fn recovery_statistics(&self) -> RecoveryStatistics {
        self.recovery.statistics()
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Start queued jobs while slots are free. Returns how many started.
    pub fn tick(&self) -> usize {
        self.scheduler.tick()
    }

    /// Evict terminal jobs past retention. Returns how many were evicted.
    pub async fn cleanup(&self) -> usize {
        self.scheduler.cleanup().await
    }

    /// Resubmit due parked jobs and evict expired records.
    pub async fn sweep(&self) -> SweepReport {
        self.scheduler.run_recovery_sweep().await
    }

    /// Reload unfinished jobs and parked failure records. Returns
    /// `(jobs, records)` restored.
    pub async fn restore(&self) -> Result<(usize, usize)> {
        let records = self.recovery.restore().await?;
        let jobs = self.scheduler.restore().await?;
        Ok((jobs, records))
    }

    /// Stop every pipeline. Jobs keep their current status for a later
    /// [`restore`](Self::restore).
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
