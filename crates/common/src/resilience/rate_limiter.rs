//! Admission control for outbound calls.
//!
//! A call is admitted when three sliding windows (minute, hour, day) are all
//! under their limits and fewer than `max_concurrent` calls are in flight.
//! Otherwise [`RateLimiter::acquire`] parks the caller in a priority wait
//! queue (high > normal > low, FIFO within a tier) until capacity frees, the
//! queue timeout elapses, or the queue is full.
//!
//! Window limits are scaled by an adaptive multiplier driven by remote quota
//! usage reported through [`RateLimiter::update_quota_usage`].
//!
//! Admission returns a [`RatePermit`]; dropping it frees the concurrency slot
//! and admits queued waiters. A periodic sweep ([`RateLimiter::sweep`],
//! [`RateLimiter::spawn_sweeper`]) admits waiters whose blocking window has
//! since rolled over.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::{ConfigError, ConfigResult};
use crate::error::ServiceError;
use crate::utils::serde::duration_millis;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Wait-queue priority of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for AdmissionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        };
        f.write_str(name)
    }
}

/// Configuration for the rate limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: u32,
    /// Maximum calls in flight at once
    pub max_concurrent: usize,
    /// Maximum callers waiting for admission
    pub max_queue_size: usize,
    /// How long a caller may wait in the queue
    #[serde(with = "duration_millis")]
    pub queue_timeout: Duration,
    /// Period of the background sweep
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1_000,
            requests_per_day: 10_000,
            max_concurrent: 10,
            max_queue_size: 100,
            queue_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(500),
        }
    }
}

impl RateLimiterConfig {
    /// Create a configuration builder
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.requests_per_minute == 0 || self.requests_per_hour == 0 || self.requests_per_day == 0 {
            return Err(ConfigError::invalid("window limits must be greater than 0"));
        }
        if self.requests_per_minute > self.requests_per_hour
            || self.requests_per_hour > self.requests_per_day
        {
            return Err(ConfigError::invalid(
                "window limits must not decrease from minute to hour to day",
            ));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be greater than 0"));
        }
        if self.queue_timeout.is_zero() {
            return Err(ConfigError::invalid("queue_timeout must be greater than 0"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::invalid("sweep_interval must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`RateLimiterConfig`]
#[derive(Debug, Default)]
pub struct RateLimiterConfigBuilder {
    config: RateLimiterConfig,
}

impl RateLimiterConfigBuilder {
    pub fn new() -> Self {
        Self { config: RateLimiterConfig::default() }
    }

    pub fn requests_per_minute(mut self, limit: u32) -> Self {
        self.config.requests_per_minute = limit;
        self
    }

    pub fn requests_per_hour(mut self, limit: u32) -> Self {
        self.config.requests_per_hour = limit;
        self
    }

    pub fn requests_per_day(mut self, limit: u32) -> Self {
        self.config.requests_per_day = limit;
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.max_queue_size = size;
        self
    }

    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.config.queue_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn build(self) -> ConfigResult<RateLimiterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// An admission request that could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRejection {
    pub reason: String,
    /// Suggested wait before trying again
    pub retry_after: Duration,
}

impl RateLimitRejection {
    /// Convert into the `RateLimited` service error.
    pub fn into_error(self) -> ServiceError {
        ServiceError::RateLimited { reason: self.reason, retry_after: self.retry_after }
    }
}

impl From<RateLimitRejection> for ServiceError {
    fn from(rejection: RateLimitRejection) -> Self {
        rejection.into_error()
    }
}

/// Point-in-time view of limiter usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterSnapshot {
    pub minute_used: usize,
    pub minute_limit: usize,
    pub hour_used: usize,
    pub hour_limit: usize,
    pub day_used: usize,
    pub day_limit: usize,
    pub in_flight: usize,
    pub max_concurrent: usize,
    pub queued: usize,
    pub multiplier: f64,
    pub admitted_total: u64,
    pub rejected_total: u64,
}

struct Waiter {
    priority: AdmissionPriority,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Window {
    span: Duration,
    nominal: u32,
    hits: VecDeque<Instant>,
}

impl Window {
    fn new(span: Duration, nominal: u32) -> Self {
        Self { span, nominal, hits: VecDeque::new() }
    }

    fn prune(&mut self, now: Instant) {
        while self.hits.front().is_some_and(|at| now.saturating_duration_since(*at) >= self.span) {
            self.hits.pop_front();
        }
    }

    fn limit(&self, multiplier: f64) -> usize {
        ((f64::from(self.nominal) * multiplier).floor() as usize).max(1)
    }

    fn is_full(&self, multiplier: f64) -> bool {
        self.hits.len() >= self.limit(multiplier)
    }

    /// Time until the oldest hit leaves the window.
    fn retry_after(&self, now: Instant) -> Duration {
        self.hits
            .front()
            .map_or(Duration::ZERO, |oldest| self.span.saturating_sub(now.saturating_duration_since(*oldest)))
    }
}

struct LimiterState {
    windows: [Window; 3],
    in_flight: usize,
    queue: BinaryHeap<Waiter>,
    next_seq: u64,
    multiplier: f64,
    admitted_total: u64,
    rejected_total: u64,
}

impl LimiterState {
    fn prune(&mut self, now: Instant) {
        for window in &mut self.windows {
            window.prune(now);
        }
    }

    fn has_capacity(&self, max_concurrent: usize) -> bool {
        self.in_flight < max_concurrent && self.windows.iter().all(|w| !w.is_full(self.multiplier))
    }

    fn admit(&mut self, now: Instant) {
        for window in &mut self.windows {
            window.hits.push_back(now);
        }
        self.in_flight += 1;
        self.admitted_total += 1;
    }

    fn undo_admit(&mut self) {
        for window in &mut self.windows {
            window.hits.pop_back();
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        self.admitted_total = self.admitted_total.saturating_sub(1);
    }

    /// Why admission is blocked right now, and when to try again.
    fn blocked(&self, now: Instant, max_concurrent: usize, sweep_interval: Duration) -> (String, Duration) {
        let names = ["minute", "hour", "day"];
        let full = self
            .windows
            .iter()
            .zip(names)
            .filter(|(w, _)| w.is_full(self.multiplier))
            .map(|(w, name)| (name, w.retry_after(now)))
            .max_by_key(|(_, after)| *after);
        match full {
            Some((name, after)) => (format!("per-{name} request limit reached"), after),
            None if self.in_flight >= max_concurrent => {
                (format!("{max_concurrent} requests already in flight"), sweep_interval)
            }
            None => ("admission queue is busy".to_string(), sweep_interval),
        }
    }

    fn has_waiter_at_or_above(&self, priority: AdmissionPriority) -> bool {
        self.queue.iter().any(|w| w.priority >= priority && !w.tx.is_closed())
    }
}

struct Shared<C: Clock> {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
    clock: C,
}

impl<C: Clock> Shared<C> {
    /// Admit queued waiters while capacity lasts. Caller holds the lock.
    fn drain(&self, state: &mut LimiterState) -> usize {
        let now = self.clock.now();
        state.prune(now);
        state.queue.retain(|w| !w.tx.is_closed());

        let mut admitted = 0;
        while state.has_capacity(self.config.max_concurrent) {
            let Some(waiter) = state.queue.pop() else { break };
            state.admit(now);
            if waiter.tx.send(()).is_err() {
                state.undo_admit();
                continue;
            }
            debug!(priority = %waiter.priority, "Queued request admitted");
            admitted += 1;
        }
        admitted
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        self.drain(&mut state);
    }
}

/// Sliding-window rate limiter with a priority wait queue.
///
/// Cloning is cheap; clones share the same windows and queue.
pub struct RateLimiter<C: Clock = SystemClock> {
    shared: Arc<Shared<C>>,
}

impl<C: Clock> Clone for RateLimiter<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Clock> fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").field("config", &self.shared.config).finish_non_exhaustive()
    }
}

impl RateLimiter<SystemClock> {
    /// Create a limiter on the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(config: RateLimiterConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a limiter with a custom clock (useful for testing)
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let state = LimiterState {
            windows: [
                Window::new(MINUTE, config.requests_per_minute),
                Window::new(HOUR, config.requests_per_hour),
                Window::new(DAY, config.requests_per_day),
            ],
            in_flight: 0,
            queue: BinaryHeap::new(),
            next_seq: 0,
            multiplier: 1.0,
            admitted_total: 0,
            rejected_total: 0,
        };
        Ok(Self { shared: Arc::new(Shared { config, state: Mutex::new(state), clock }) })
    }

    /// The configured base limits.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.shared.config
    }

    /// Admit immediately or fail without queueing.
    ///
    /// Waiters of equal or higher priority already in the queue go first.
    pub fn try_acquire(&self, priority: AdmissionPriority) -> Result<RatePermit<C>, RateLimitRejection> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let now = shared.clock.now();
        state.prune(now);

        if state.has_capacity(shared.config.max_concurrent) && !state.has_waiter_at_or_above(priority) {
            state.admit(now);
            return Ok(self.permit());
        }

        state.rejected_total += 1;
        let (reason, retry_after) = state.blocked(now, shared.config.max_concurrent, shared.config.sweep_interval);
        debug!(priority = %priority, reason = %reason, "Admission refused");
        Err(RateLimitRejection { reason, retry_after })
    }

    /// Admit, waiting in the priority queue up to `queue_timeout`.
    pub async fn acquire(&self, priority: AdmissionPriority) -> Result<RatePermit<C>, RateLimitRejection> {
        let shared = &self.shared;
        let rx = {
            let mut state = shared.state.lock();
            let now = shared.clock.now();
            state.prune(now);

            if state.queue.is_empty() && state.has_capacity(shared.config.max_concurrent) {
                state.admit(now);
                return Ok(self.permit());
            }

            state.queue.retain(|w| !w.tx.is_closed());
            if state.queue.len() >= shared.config.max_queue_size {
                state.rejected_total += 1;
                let (_, retry_after) =
                    state.blocked(now, shared.config.max_concurrent, shared.config.sweep_interval);
                warn!(priority = %priority, queued = state.queue.len(), "Admission queue full");
                return Err(RateLimitRejection {
                    reason: format!("admission queue full ({} waiting)", state.queue.len()),
                    retry_after,
                });
            }

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(Waiter { priority, seq, tx });
            debug!(priority = %priority, queued = state.queue.len(), "Request queued for admission");

            // A higher-priority arrival may be admissible right away.
            shared.drain(&mut state);
            rx
        };

        let mut ticket = Ticket { rx, settled: false, shared: Arc::clone(shared) };
        let outcome = tokio::time::timeout(shared.config.queue_timeout, &mut ticket.rx).await;

        match outcome {
            Ok(Ok(())) => {
                ticket.settled = true;
                Ok(self.permit())
            }
            Ok(Err(_)) => {
                ticket.settled = true;
                Err(RateLimitRejection {
                    reason: "admission request dropped".to_string(),
                    retry_after: shared.config.sweep_interval,
                })
            }
            Err(_elapsed) => {
                if ticket.take_grant() {
                    return Ok(self.permit());
                }
                let mut state = shared.state.lock();
                state.rejected_total += 1;
                let now = shared.clock.now();
                state.prune(now);
                let (reason, retry_after) =
                    state.blocked(now, shared.config.max_concurrent, shared.config.sweep_interval);
                let timeout_ms = u64::try_from(shared.config.queue_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(priority = %priority, timeout_ms, "Timed out waiting for admission");
                Err(RateLimitRejection { reason: format!("timed out in admission queue: {reason}"), retry_after })
            }
        }
    }

    /// Admit queued waiters that now fit. Returns how many were admitted.
    pub fn sweep(&self) -> usize {
        let mut state = self.shared.state.lock();
        self.shared.drain(&mut state)
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval` until `token` is
    /// cancelled.
    pub fn spawn_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        let interval = self.shared.config.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!("Rate limiter sweeper stopped");
                        break;
                    }
                    () = tokio::time::sleep(interval) => {
                        let admitted = limiter.sweep();
                        if admitted > 0 {
                            debug!(admitted, "Sweep admitted queued requests");
                        }
                    }
                }
            }
        })
    }

    /// Scale window limits to the remote quota usage.
    ///
    /// | usage | multiplier |
    /// |---|---|
    /// | >= 90% | 0.10 |
    /// | >= 75% | 0.50 |
    /// | >= 50% | 0.75 |
    /// | otherwise | 1.00 |
    pub fn update_quota_usage(&self, used: u64, limit: u64) {
        if limit == 0 {
            return;
        }
        let usage = used as f64 / limit as f64;
        let multiplier = match usage {
            u if u >= 0.9 => 0.1,
            u if u >= 0.75 => 0.5,
            u if u >= 0.5 => 0.75,
            _ => 1.0,
        };

        let mut state = self.shared.state.lock();
        if (state.multiplier - multiplier).abs() > f64::EPSILON {
            info!(
                usage_pct = usage * 100.0,
                from = state.multiplier,
                to = multiplier,
                "Adaptive rate multiplier changed"
            );
            state.multiplier = multiplier;
            self.shared.drain(&mut state);
        }
    }

    /// Current adaptive multiplier.
    pub fn multiplier(&self) -> f64 {
        self.shared.state.lock().multiplier
    }

    /// Current window counts, queue depth and multiplier.
    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let mut state = self.shared.state.lock();
        let now = self.shared.clock.now();
        state.prune(now);
        let m = state.multiplier;
        let [minute, hour, day] = &state.windows;
        RateLimiterSnapshot {
            minute_used: minute.hits.len(),
            minute_limit: minute.limit(m),
            hour_used: hour.hits.len(),
            hour_limit: hour.limit(m),
            day_used: day.hits.len(),
            day_limit: day.limit(m),
            in_flight: state.in_flight,
            max_concurrent: self.shared.config.max_concurrent,
            queued: state.queue.iter().filter(|w| !w.tx.is_closed()).count(),
            multiplier: m,
            admitted_total: state.admitted_total,
            rejected_total: state.rejected_total,
        }
    }

    fn permit(&self) -> RatePermit<C> {
        RatePermit { shared: Arc::clone(&self.shared) }
    }
}

/// A granted admission. Dropping it frees the concurrency slot.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct RatePermit<C: Clock = SystemClock> {
    shared: Arc<Shared<C>>,
}

impl<C: Clock> fmt::Debug for RatePermit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatePermit").finish_non_exhaustive()
    }
}

impl<C: Clock> Drop for RatePermit<C> {
    fn drop(&mut self) {
        self.shared.release();
    }
}

/// A queued admission request. If the waiting future is dropped after the
/// grant was sent but before it was observed, the slot is handed back.
struct Ticket<C: Clock> {
    rx: oneshot::Receiver<()>,
    settled: bool,
    shared: Arc<Shared<C>>,
}

impl<C: Clock> Ticket<C> {
    /// Close the channel and report whether a grant raced the close.
    fn take_grant(&mut self) -> bool {
        self.settled = true;
        self.rx.close();
        self.rx.try_recv().is_ok()
    }
}

impl<C: Clock> Drop for Ticket<C> {
    fn drop(&mut self) {
        if !self.settled && self.take_grant() {
            self.shared.release();
        }
    }
}
