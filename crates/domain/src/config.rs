//! Configuration structures
//!
//! Every struct is `#[serde(default)]`, so a config file only needs the keys
//! it changes. Durations are written as milliseconds.

use std::path::PathBuf;
use std::time::Duration;

use scribeflow_common::duration_millis;
use scribeflow_common::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CLEANUP_INTERVAL_MS, DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_MAX_FAILED_RECORDS,
    DEFAULT_MAX_JOB_DURATION_MS, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_MAX_POLL_INTERVAL_MS,
    DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RESULT_BYTES, DEFAULT_MAX_RETRIES,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_RECORD_RETENTION_MS, DEFAULT_RECOVERY_SWEEP_MS,
    DEFAULT_RETENTION_MS, DEFAULT_TICK_INTERVAL_MS, POLLS_PER_BACKOFF_STEP,
};
use crate::errors::{OrchestratorError, Result};

fn ensure(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(OrchestratorError::config(message))
    }
}

/// Job scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
    pub max_queue_size: usize,
    /// Period of the dispatch tick
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,
    /// Period of the retention cleanup
    #[serde(with = "duration_millis")]
    pub cleanup_interval: Duration,
    /// How long terminal jobs stay in memory
    #[serde(with = "duration_millis")]
    pub retention: Duration,
    /// Retry re-entries allowed per job before it fails
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            cleanup_interval: Duration::from_millis(DEFAULT_CLEANUP_INTERVAL_MS),
            retention: Duration::from_millis(DEFAULT_RETENTION_MS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl SchedulerConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        ensure(self.max_concurrent_jobs > 0, "scheduler.max_concurrent_jobs must be greater than 0")?;
        ensure(self.max_queue_size > 0, "scheduler.max_queue_size must be greater than 0")?;
        ensure(!self.tick_interval.is_zero(), "scheduler.tick_interval must be greater than 0")?;
        ensure(!self.cleanup_interval.is_zero(), "scheduler.cleanup_interval must be greater than 0")
    }
}

/// Progress tracker polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    #[serde(with = "duration_millis")]
    pub base_interval: Duration,
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,
    /// Interval factor while the job has not started or is below 10%
    pub early_stage_factor: f64,
    /// Interval factor at 75% progress and above
    pub near_completion_factor: f64,
    /// Interval factor at 90% progress and above
    pub final_stretch_factor: f64,
    /// Growth applied once per `polls_per_backoff` polls
    pub backoff_multiplier: f64,
    pub polls_per_backoff: u32,
    /// Upper bound of the random extra delay, as a fraction of the interval
    pub jitter: f64,
    /// Safety valve: stop after this many polls
    pub max_poll_attempts: u32,
    /// Safety valve: stop after the job has run this long
    #[serde(with = "duration_millis")]
    pub max_job_duration: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_interval: Duration::from_millis(DEFAULT_MAX_POLL_INTERVAL_MS),
            early_stage_factor: 1.5,
            near_completion_factor: 0.75,
            final_stretch_factor: 0.5,
            backoff_multiplier: 1.2,
            polls_per_backoff: POLLS_PER_BACKOFF_STEP,
            jitter: 0.1,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_job_duration: Duration::from_millis(DEFAULT_MAX_JOB_DURATION_MS),
        }
    }
}

impl TrackerConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        ensure(!self.base_interval.is_zero(), "tracker.base_interval must be greater than 0")?;
        ensure(self.max_interval >= self.base_interval, "tracker.max_interval must be at least base_interval")?;
        ensure(
            self.early_stage_factor > 0.0 && self.near_completion_factor > 0.0 && self.final_stretch_factor > 0.0,
            "tracker interval factors must be positive",
        )?;
        ensure(self.backoff_multiplier >= 1.0, "tracker.backoff_multiplier must be at least 1.0")?;
        ensure(self.polls_per_backoff > 0, "tracker.polls_per_backoff must be greater than 0")?;
        ensure((0.0..=0.1).contains(&self.jitter), "tracker.jitter must be within [0, 0.1]")?;
        ensure(self.max_poll_attempts > 0, "tracker.max_poll_attempts must be greater than 0")?;
        ensure(!self.max_job_duration.is_zero(), "tracker.max_job_duration must be greater than 0")
    }
}

/// Result collector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Largest result document accepted, in bytes
    pub max_result_bytes: u64,
    /// Segments below this confidence are dropped
    pub min_confidence: f64,
    pub include_word_timings: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { max_result_bytes: DEFAULT_MAX_RESULT_BYTES, min_confidence: 0.0, include_word_timings: true }
    }
}

impl CollectorConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        ensure(self.max_result_bytes > 0, "collector.max_result_bytes must be greater than 0")?;
        ensure((0.0..=1.0).contains(&self.min_confidence), "collector.min_confidence must be within [0, 1]")
    }
}

/// Recovery orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Recoveries allowed per job lineage before giving up
    pub max_recovery_attempts: u32,
    /// Failures with an estimated recovery at or below this retry at once
    #[serde(with = "duration_millis")]
    pub immediate_retry_threshold: Duration,
    /// Delays above this park the job instead of holding its slot
    #[serde(with = "duration_millis")]
    pub max_inline_delay: Duration,
    /// Capacity of the parked-record store
    pub max_failed_records: usize,
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,
    /// Parked records older than this are evicted
    #[serde(with = "duration_millis")]
    pub record_retention: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
            immediate_retry_threshold: Duration::ZERO,
            max_inline_delay: Duration::from_secs(120),
            max_failed_records: DEFAULT_MAX_FAILED_RECORDS,
            sweep_interval: Duration::from_millis(DEFAULT_RECOVERY_SWEEP_MS),
            record_retention: Duration::from_millis(DEFAULT_RECORD_RETENTION_MS),
        }
    }
}

impl RecoveryConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        ensure(self.max_recovery_attempts > 0, "recovery.max_recovery_attempts must be greater than 0")?;
        ensure(self.max_failed_records > 0, "recovery.max_failed_records must be greater than 0")?;
        ensure(!self.sweep_interval.is_zero(), "recovery.sweep_interval must be greater than 0")?;
        ensure(!self.record_retention.is_zero(), "recovery.record_retention must be greater than 0")
    }
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (`RUST_LOG` overrides it)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

/// Complete orchestrator configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub scheduler: SchedulerConfig,
    pub tracker: TrackerConfig,
    pub collector: CollectorConfig,
    pub recovery: RecoveryConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub logging: LoggingConfig,
    /// Directory for persisted job and failure snapshots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_path: Option<PathBuf>,
}

impl OrchestratorConfig {
    /// Validate every component configuration.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.tracker.validate()?;
        self.collector.validate()?;
        self.recovery.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.rate_limiter.validate()?;
        Ok(())
    }
}
