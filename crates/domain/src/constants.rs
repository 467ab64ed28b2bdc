//! Domain constants
//!
//! Centralized location for constants shared by the orchestration crates.

// Circuit breaker targets
/// Breaker target for job submission.
pub const TARGET_SUBMISSION: &str = "submission";
/// Breaker target for status queries.
pub const TARGET_STATUS: &str = "status";
/// Breaker target for result downloads.
pub const TARGET_RESULTS: &str = "results";

// Scheduler defaults
/// Jobs allowed to hold a slot at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 3;
/// Queued jobs beyond this are rejected.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
/// How often queued jobs are dispatched.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
/// How often terminal jobs are evicted.
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 5 * 60 * 1_000;
/// Terminal jobs are kept this long before eviction.
pub const DEFAULT_RETENTION_MS: u64 = 60 * 60 * 1_000;
/// Job-level retries before recovery escalates.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// Progress tracker defaults
/// First status poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
/// Upper bound for the adaptive poll interval.
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 60_000;
/// Polls before the tracker gives up on a job.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 720;
/// Wall-clock budget for a job from its first submission.
pub const DEFAULT_MAX_JOB_DURATION_MS: u64 = 4 * 60 * 60 * 1_000;
/// The poll interval grows once per this many polls.
pub const POLLS_PER_BACKOFF_STEP: u32 = 10;

// Result collector defaults
/// Largest result document the collector downloads.
pub const DEFAULT_MAX_RESULT_BYTES: u64 = 100 * 1024 * 1024;

// Recovery defaults
/// Parked records kept before the oldest are evicted.
pub const DEFAULT_MAX_FAILED_RECORDS: usize = 1_000;
/// How often parked records are swept.
pub const DEFAULT_RECOVERY_SWEEP_MS: u64 = 5 * 60 * 1_000;
/// Parked records older than this are evicted by the sweep.
pub const DEFAULT_RECORD_RETENTION_MS: u64 = 24 * 60 * 60 * 1_000;

/// Remote transcripts express time in 100ns ticks.
pub const TICKS_PER_MILLISECOND: u64 = 10_000;

// Event channel
/// Events buffered per subscriber before it lags.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
