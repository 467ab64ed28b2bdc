//! Progress tracking for submitted jobs
//!
//! [`ProgressTracker::monitor`] polls the remote status of one job until it
//! reaches a terminal remote state, a safety valve trips, or the job is
//! cancelled. Each poll goes through the shared [`ServiceGuard`], so the
//! tracker respects the rate limiter and the `status` circuit breaker, and
//! quota usage reported by the service feeds the limiter's multiplier.
//!
//! # Poll interval
//!
//! ```text
//! interval = base
//!          × stage factor     (early: <10% or not started; near: >=75%; final: >=90%)
//!          × backoff^(polls / polls_per_backoff)
//! capped at max_interval, then up to `jitter` extra
//! ```
//!
//! # Progress estimation
//!
//! The service rarely reports a percentage. When it does not, progress is
//! estimated from the time spent running: linear against the expected
//! audio duration (capped at 95%), or a staged curve approaching 80% when
//! the duration is unknown. Estimates never decrease.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use scribeflow_common::{Clock, ServiceError, SystemClock};
use scribeflow_domain::constants::TARGET_STATUS;
use scribeflow_domain::{JobId, JobPriority, RemoteJobStatus, StatusReport, TrackerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::guard::ServiceGuard;
use crate::ports::StatusQuery;

/// Why monitoring stopped before a terminal remote state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxPollAttempts(u32),
    MaxDuration(Duration),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxPollAttempts(polls) => write!(f, "gave up after {polls} status polls"),
            Self::MaxDuration(limit) => write!(f, "job exceeded the maximum duration of {limit:?}"),
        }
    }
}

/// How a monitoring run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// The remote job succeeded.
    Succeeded(StatusReport),
    /// The remote job failed, or status polling failed for good.
    Failed(ServiceError),
    /// A safety valve tripped.
    Stopped(StopReason),
    /// The job's cancellation token fired.
    Cancelled,
}

/// Callbacks invoked while a job is monitored.
pub trait ProgressObserver: Send + Sync {
    /// Progress estimate changed.
    fn on_progress(&self, _job_id: &JobId, _percent: u8, _remote: RemoteJobStatus) {}

    /// Remote status changed (`from` is `None` on the first poll).
    fn on_status_change(&self, _job_id: &JobId, _from: Option<RemoteJobStatus>, _to: RemoteJobStatus) {}
}

/// What the tracker needs to know about the job it monitors.
#[derive(Debug, Clone)]
pub struct MonitorRequest {
    pub job_id: JobId,
    pub external_id: String,
    pub priority: JobPriority,
    pub expected_duration: Option<Duration>,
    /// Time the job already spent since its first submission, counted
    /// against `max_job_duration`
    pub elapsed: Duration,
}

/* -------------------------------------------------------------------------- */
/* Progress estimation */
/* -------------------------------------------------------------------------- */

/// Monotonic progress estimate for one job.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    expected_duration: Option<Duration>,
    last: u8,
}

impl ProgressEstimator {
    /// Linear against `expected_duration` when known, staged otherwise.
    pub fn new(expected_duration: Option<Duration>) -> Self {
        Self { expected_duration, last: 0 }
    }

    /// Latest estimate.
    pub fn current(&self) -> u8 {
        self.last
    }

    /// Update the estimate from a status poll.
    ///
    /// `running_for` is the time since the job was first seen running.
    pub fn observe(&mut self, status: RemoteJobStatus, reported: Option<f64>, running_for: Duration) -> u8 {
        let estimate = match status {
            RemoteJobStatus::NotStarted => 0,
            RemoteJobStatus::Succeeded => 100,
            RemoteJobStatus::Failed => {
                self.last = 0;
                return 0;
            }
            RemoteJobStatus::Running => match reported {
                Some(percent) if percent.is_finite() => percent.clamp(0.0, 99.0) as u8,
                _ => self.estimate_running(running_for),
            },
        };
        self.last = self.last.max(estimate);
        self.last
    }

    fn estimate_running(&self, running_for: Duration) -> u8 {
        match self.expected_duration {
            Some(expected) if !expected.is_zero() => {
                let ratio = running_for.as_secs_f64() / expected.as_secs_f64();
                (ratio * 100.0).min(95.0) as u8
            }
            _ => staged_estimate(running_for),
        }
    }
}

/// Staged curve for jobs of unknown length: 5/15/35/60% after 1/5/15/30
/// minutes, then easing towards 80%.
fn staged_estimate(running_for: Duration) -> u8 {
    const MINUTE: u64 = 60;
    let secs = running_for.as_secs();
    if secs < MINUTE {
        5
    } else if secs < 5 * MINUTE {
        15
    } else if secs < 15 * MINUTE {
        35
    } else if secs < 30 * MINUTE {
        60
    } else {
        let beyond = (secs - 30 * MINUTE) as f64 / (30 * MINUTE) as f64;
        let eased = 60.0 + 20.0 * (1.0 - (-beyond).exp());
        (eased as u8).min(79)
    }
}

/* -------------------------------------------------------------------------- */
/* Poll interval */
/* -------------------------------------------------------------------------- */

/// Interval before the next poll, without jitter.
pub fn poll_interval(config: &TrackerConfig, polls: u32, percent: u8, status: RemoteJobStatus) -> Duration {
    let stage = if status == RemoteJobStatus::NotStarted || percent < 10 {
        config.early_stage_factor
    } else if percent >= 90 {
        config.final_stretch_factor
    } else if percent >= 75 {
        config.near_completion_factor
    } else {
        1.0
    };
    let steps = i32::try_from(polls / config.polls_per_backoff.max(1)).unwrap_or(i32::MAX);
    let factor = stage * config.backoff_multiplier.powi(steps);

    let millis = config.base_interval.as_millis() as f64 * factor;
    if millis.is_finite() && millis < config.max_interval.as_millis() as f64 {
        Duration::from_millis(millis as u64)
    } else {
        config.max_interval
    }
}

fn with_jitter(interval: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || interval.is_zero() {
        return interval;
    }
    interval.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..=jitter))
}

/* -------------------------------------------------------------------------- */
/* Tracker */
/* -------------------------------------------------------------------------- */

/// Polls remote status with adaptive intervals.
pub struct ProgressTracker<C: Clock + Clone = SystemClock> {
    config: TrackerConfig,
    status: Arc<dyn StatusQuery>,
    guard: Arc<ServiceGuard<C>>,
    clock: C,
}

impl<C: Clock + Clone> ProgressTracker<C> {
    /// Tracker polling through `status` under `guard`.
    pub fn new(config: TrackerConfig, status: Arc<dyn StatusQuery>, guard: Arc<ServiceGuard<C>>, clock: C) -> Self {
        Self { config, status, guard, clock }
    }

    /// Polling configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Monitor one job until it ends, a safety valve trips or `cancel` fires.
    #[instrument(skip(self, observer, cancel), fields(job_id = %request.job_id, external_id = %request.external_id))]
    pub async fn monitor(
        &self,
        request: &MonitorRequest,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> MonitorOutcome {
        let started = self.clock.now();
        let mut estimator = ProgressEstimator::new(request.expected_duration);
        let mut last_status: Option<RemoteJobStatus> = None;
        let mut running_since = None;
        let mut polls: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return MonitorOutcome::Cancelled;
            }
            if polls >= self.config.max_poll_attempts {
                warn!(polls, "Poll attempt limit reached");
                return MonitorOutcome::Stopped(StopReason::MaxPollAttempts(polls));
            }
            let total = request.elapsed.saturating_add(self.clock.now().saturating_duration_since(started));
            if total >= self.config.max_job_duration {
                warn!(polls, "Maximum job duration reached");
                return MonitorOutcome::Stopped(StopReason::MaxDuration(self.config.max_job_duration));
            }

            polls += 1;
            let report = match self.poll(request, cancel).await {
                Ok(report) => report,
                Err(ServiceError::Cancelled) => return MonitorOutcome::Cancelled,
                Err(error) => {
                    warn!(polls, error = %error, "Status polling failed");
                    return MonitorOutcome::Failed(error);
                }
            };

            if let Some(quota) = report.quota {
                self.guard.limiter().update_quota_usage(quota.used, quota.limit);
            }

            if last_status != Some(report.status) {
                debug!(from = ?last_status, to = %report.status, "Remote status changed");
                observer.on_status_change(&request.job_id, last_status, report.status);
                last_status = Some(report.status);
            }

            if report.status == RemoteJobStatus::Running && running_since.is_none() {
                running_since = Some(self.clock.now());
            }
            let running_for =
                running_since.map_or(Duration::ZERO, |since| self.clock.now().saturating_duration_since(since));

            let previous = estimator.current();
            let percent = estimator.observe(report.status, report.progress, running_for);
            if percent != previous {
                observer.on_progress(&request.job_id, percent, report.status);
            }

            match report.status {
                RemoteJobStatus::Succeeded => {
                    info!(polls, "Remote job succeeded");
                    return MonitorOutcome::Succeeded(report);
                }
                RemoteJobStatus::Failed => {
                    let error = remote_failure(&report);
                    warn!(polls, error = %error, "Remote job failed");
                    return MonitorOutcome::Failed(error);
                }
                RemoteJobStatus::NotStarted | RemoteJobStatus::Running => {}
            }

            let delay = with_jitter(poll_interval(&self.config, polls, percent, report.status), self.config.jitter);
            tokio::select! {
                () = cancel.cancelled() => return MonitorOutcome::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn poll(&self, request: &MonitorRequest, cancel: &CancellationToken) -> Result<StatusReport, ServiceError> {
        let external_id = request.external_id.as_str();
        self.guard
            .call(TARGET_STATUS, request.priority.admission(), cancel, |credentials| async move {
                self.status.query_status(external_id, &credentials).await
            })
            .await
    }
}

fn remote_failure(report: &StatusReport) -> ServiceError {
    match &report.failure {
        Some(failure) => ServiceError::Remote {
            code: failure.code.clone(),
            status: None,
            message: failure.message.clone(),
            retry_after: None,
        },
        None => ServiceError::remote_message("remote job failed without details"),
    }
}
