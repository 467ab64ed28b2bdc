//! In-memory implementations of every port, for tests
//!
//! Enabled for this crate's own tests and, through the `test-utils`
//! feature, for integration tests and downstream crates.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scribeflow_common::resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, RateLimiter, RateLimiterConfig, RetryConfig,
    RetryCoordinator,
};
use scribeflow_common::{Clock, MockClock, ServiceError, SystemClock};
use scribeflow_domain::{
    FailedJobRecord, JobId, ManagedJob, OrchestratorConfig, RemoteJobStatus, Result, ResultFile,
    ResultFileKind, StatusReport, SubmissionReceipt, TranscriptionRequest,
};

use crate::events::RecoveryNotification;
use crate::guard::ServiceGuard;
use crate::ports::{
    CredentialProvider, Credentials, NotificationSink, PersistenceStore, ResultFetcher,
    StaticCredentials, StatusQuery, SubmissionGateway,
};

/* -------------------------------------------------------------------------- */
/* Configuration and wiring */
/* -------------------------------------------------------------------------- */

/// Retry settings with millisecond delays and no jitter.
pub fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(1),
        jitter: 0.0,
        attempt_timeout: Some(Duration::from_secs(5)),
        ..RetryConfig::default()
    }
}

/// Limits high enough that tests never hit them.
pub fn generous_rate_limits() -> RateLimiterConfig {
    RateLimiterConfig {
        requests_per_minute: 10_000,
        requests_per_hour: 100_000,
        requests_per_day: 1_000_000,
        max_concurrent: 50,
        ..RateLimiterConfig::default()
    }
}

/// Orchestrator configuration with millisecond timings.
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.scheduler.tick_interval = Duration::from_millis(10);
    config.tracker.base_interval = Duration::from_millis(10);
    config.tracker.max_interval = Duration::from_millis(100);
    config.tracker.jitter = 0.0;
    config.retry = fast_retry_config();
    config.rate_limiter = generous_rate_limits();
    config
}

/// Service guard over static credentials with fast retries.
pub fn guard_with_clock<C: Clock + Clone>(clock: C) -> ServiceGuard<C> {
    let breakers = CircuitBreakerRegistry::with_clock(CircuitBreakerConfig::default(), clock.clone())
        .expect("default breaker config is valid");
    let limiter = RateLimiter::with_clock(generous_rate_limits(), clock).expect("rate limits are valid");
    ServiceGuard::new(
        RetryCoordinator::new(fast_retry_config()).expect("retry config is valid"),
        limiter,
        Arc::new(breakers),
        test_credentials(),
    )
}

/// [`guard_with_clock`] on the system clock.
pub fn guard() -> ServiceGuard<SystemClock> {
    guard_with_clock(SystemClock)
}

/// Static credentials with a dummy key.
pub fn test_credentials() -> Arc<dyn CredentialProvider> {
    Arc::new(StaticCredentials::new(Credentials::new("test-key").with_region("test-region")))
}

/// A valid request named `name`.
pub fn sample_request(name: &str) -> TranscriptionRequest {
    TranscriptionRequest::new(name, "en-US", vec![format!("https://audio.example/{name}.wav")])
}

/// Poll `condition` every few milliseconds until it holds or `limit`
/// passes. Works with paused Tokio time.
pub async fn wait_until<F: FnMut() -> bool>(limit: Duration, mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/* -------------------------------------------------------------------------- */
/* Remote service fakes */
/* -------------------------------------------------------------------------- */

/// Submission gateway handing out `remote-N` ids, with scripted failures.
#[derive(Default)]
pub struct ScriptedGateway {
    failures: Mutex<VecDeque<ServiceError>>,
    submitted: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    counter: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next submission with `error` (queued in order).
    pub fn fail_next(&self, error: ServiceError) {
        self.failures.lock().push_back(error);
    }

    /// Take `delay` before answering each submission.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Display names of every submission attempt, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.submitted.lock().len()
    }
}

#[async_trait]
impl SubmissionGateway for ScriptedGateway {
    async fn submit(
        &self,
        request: &TranscriptionRequest,
        _config: &serde_json::Value,
        _credentials: &Credentials,
    ) -> std::result::Result<SubmissionReceipt, ServiceError> {
        self.submitted.lock().push(request.display_name.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SubmissionReceipt { external_id: format!("remote-{n}"), quota: None })
    }
}

/// Status query replaying a script per external id; the last report
/// repeats once the script runs out.
pub struct ScriptedStatusQuery {
    script: Vec<StatusReport>,
    cursors: Mutex<HashMap<String, usize>>,
    failures: Mutex<VecDeque<ServiceError>>,
    advance: Option<(MockClock, Duration)>,
    calls: AtomicUsize,
}

impl ScriptedStatusQuery {
    /// Replay `script` per external id; the last report repeats.
    pub fn new(script: Vec<StatusReport>) -> Self {
        Self {
            script,
            cursors: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            advance: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Running, then succeeded.
    pub fn succeeding() -> Self {
        Self::new(vec![
            StatusReport::new(RemoteJobStatus::Running).with_progress(50.0),
            StatusReport::new(RemoteJobStatus::Succeeded),
        ])
    }

    /// Advance `clock` by `step` on every query.
    #[must_use]
    pub fn advancing(mut self, clock: MockClock, step: Duration) -> Self {
        self.advance = Some((clock, step));
        self
    }

    /// Fail the next query with `error` (queued in order).
    pub fn fail_next(&self, error: ServiceError) {
        self.failures.lock().push_back(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries made for `external_id`.
    pub fn calls_for(&self, external_id: &str) -> usize {
        self.cursors.lock().get(external_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl StatusQuery for ScriptedStatusQuery {
    async fn query_status(
        &self,
        external_id: &str,
        _credentials: &Credentials,
    ) -> std::result::Result<StatusReport, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, step)) = &self.advance {
            clock.advance(*step);
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(external_id.to_string()).or_insert(0);
        let index = (*cursor).min(self.script.len().saturating_sub(1));
        *cursor += 1;
        self.script
            .get(index)
            .cloned()
            .ok_or_else(|| ServiceError::internal("empty status script"))
    }
}

/// Result fetcher serving one transcription document.
pub struct InMemoryResultFetcher {
    document: Vec<u8>,
    downloads: AtomicUsize,
}

impl InMemoryResultFetcher {
    pub fn new(document: Vec<u8>) -> Self {
        Self { document, downloads: AtomicUsize::new(0) }
    }

    /// Documents downloaded so far.
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultFetcher for InMemoryResultFetcher {
    async fn list_result_files(
        &self,
        external_id: &str,
        _credentials: &Credentials,
    ) -> std::result::Result<Vec<ResultFile>, ServiceError> {
        Ok(vec![
            ResultFile {
                name: "report.json".into(),
                kind: ResultFileKind::Report,
                size: 64,
                url: format!("https://results.example/{external_id}/report.json"),
            },
            ResultFile {
                name: "contenturl_0.json".into(),
                kind: ResultFileKind::Transcription,
                size: self.document.len() as u64,
                url: format!("https://results.example/{external_id}/contenturl_0.json"),
            },
        ])
    }

    async fn download_file(
        &self,
        _file: &ResultFile,
        _credentials: &Credentials,
    ) -> std::result::Result<Vec<u8>, ServiceError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(self.document.clone())
    }
}

/// A two-speaker recognition document.
pub fn sample_transcript() -> Vec<u8> {
    serde_json::json!({
        "source": "https://audio.example/call.wav",
        "durationInTicks": 80_000_000u64,
        "recognizedPhrases": [
            {
                "recognitionStatus": "Success",
                "speaker": 1,
                "offsetInTicks": 0,
                "durationInTicks": 30_000_000u64,
                "nBest": [{
                    "confidence": 0.92,
                    "display": "Thanks for calling.",
                    "lexical": "thanks for calling",
                    "words": [
                        {"word": "thanks", "offsetInTicks": 0, "durationInTicks": 10_000_000u64, "confidence": 0.95},
                        {"word": "for", "offsetInTicks": 10_000_000u64, "durationInTicks": 5_000_000u64},
                        {"word": "calling", "offsetInTicks": 15_000_000u64, "durationInTicks": 15_000_000u64}
                    ]
                }]
            },
            {
                "recognitionStatus": "Success",
                "speaker": 2,
                "offsetInTicks": 40_000_000u64,
                "durationInTicks": 30_000_000u64,
                "nBest": [{
                    "confidence": 0.84,
                    "display": "Happy to help.",
                    "lexical": "happy to help"
                }]
            }
        ]
    })
    .to_string()
    .into_bytes()
}

/* -------------------------------------------------------------------------- */
/* Notifications and persistence */
/* -------------------------------------------------------------------------- */

/// Notification sink recording every delivery.
#[derive(Default)]
pub struct RecordingNotificationSink {
    notifications: Mutex<Vec<RecoveryNotification>>,
    failing: AtomicBool,
}

impl RecordingNotificationSink {
    pub fn notifications(&self) -> Vec<RecoveryNotification> {
        self.notifications.lock().clone()
    }

    /// Record deliveries but report them as failed.
    pub fn fail_deliveries(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, notification: &RecoveryNotification) -> std::result::Result<(), ServiceError> {
        self.notifications.lock().push(notification.clone());
        if self.failing.load(Ordering::SeqCst) {
            Err(ServiceError::transport("notification endpoint unreachable"))
        } else {
            Ok(())
        }
    }
}

/// Persistence store backed by hash maps.
#[derive(Default)]
pub struct InMemoryPersistenceStore {
    jobs: Mutex<HashMap<JobId, ManagedJob>>,
    failed: Mutex<HashMap<JobId, FailedJobRecord>>,
}

impl InMemoryPersistenceStore {
    pub fn jobs(&self) -> Vec<ManagedJob> {
        self.jobs.lock().values().cloned().collect()
    }

    pub fn job(&self, id: &JobId) -> Option<ManagedJob> {
        self.jobs.lock().get(id).cloned()
    }

    pub fn failed_records(&self) -> Vec<FailedJobRecord> {
        self.failed.lock().values().cloned().collect()
    }

    /// Store a job directly, as a previous process would have.
    pub fn seed_job(&self, job: ManagedJob) {
        self.jobs.lock().insert(job.id().clone(), job);
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistenceStore {
    async fn save_job(&self, job: &ManagedJob) -> Result<()> {
        self.jobs.lock().insert(job.id().clone(), job.clone());
        Ok(())
    }

    async fn remove_job(&self, id: &JobId) -> Result<()> {
        self.jobs.lock().remove(id);
        Ok(())
    }

    async fn load_jobs(&self) -> Result<Vec<ManagedJob>> {
        Ok(self.jobs())
    }

    async fn save_failed(&self, record: &FailedJobRecord) -> Result<()> {
        self.failed.lock().insert(record.lineage_root().clone(), record.clone());
        Ok(())
    }

    async fn remove_failed(&self, id: &JobId) -> Result<()> {
        self.failed.lock().remove(id);
        Ok(())
    }

    async fn load_failed(&self) -> Result<Vec<FailedJobRecord>> {
        Ok(self.failed_records())
    }
}
