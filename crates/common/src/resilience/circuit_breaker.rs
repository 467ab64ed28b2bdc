//! Rolling-window circuit breaker.
//!
//! One breaker guards one remote target (submission, status, results). The
//! breaker keeps a window of recent call outcomes bounded both by count and
//! by age, and trips when the failure rate crosses a threshold, but only
//! when the failure that pushed it over belongs to a configured trigger
//! category. Client-side mistakes therefore never open a circuit meant to
//! protect against outages.
//!
//! Half-open policy: a configured fraction of calls is admitted at random
//! while half-open. `success_threshold` consecutive successes close the
//! circuit; any single failure re-opens it, whatever its category. Only the
//! closed-state trip is limited to trigger categories.
//!
//! Rejected calls surface as [`ServiceError::CircuitOpen`] and are never
//! recorded in the window.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::{ConfigError, ConfigResult};
use crate::error::{classify, ErrorCategory, ServiceError};
use crate::utils::serde::duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, admitting probe requests
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure rate in `(0, 1]` at which the circuit opens
    pub failure_threshold: f64,
    /// Samples required in the window before the rate is evaluated
    pub minimum_requests: usize,
    /// Maximum outcomes kept in the window
    pub window_size: usize,
    /// Maximum age of an outcome in the window
    #[serde(with = "duration_millis")]
    pub window_duration: Duration,
    /// Time spent open before probing
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Consecutive half-open successes needed to close
    pub success_threshold: u32,
    /// Fraction of calls admitted while half-open, in `(0, 1]`
    pub half_open_admission: f64,
    /// Failure categories that may trip the circuit
    pub trigger_categories: BTreeSet<ErrorCategory>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            minimum_requests: 5,
            window_size: 20,
            window_duration: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            success_threshold: 3,
            half_open_admission: 0.5,
            trigger_categories: [ErrorCategory::Network, ErrorCategory::Service].into_iter().collect(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.failure_threshold > 0.0 && self.failure_threshold <= 1.0) {
            return Err(ConfigError::invalid("failure_threshold must be within (0, 1]"));
        }
        if self.minimum_requests == 0 {
            return Err(ConfigError::invalid("minimum_requests must be greater than 0"));
        }
        if self.window_size < self.minimum_requests {
            return Err(ConfigError::invalid("window_size must be at least minimum_requests"));
        }
        if self.window_duration.is_zero() {
            return Err(ConfigError::invalid("window_duration must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }
        if !(self.half_open_admission > 0.0 && self.half_open_admission <= 1.0) {
            return Err(ConfigError::invalid("half_open_admission must be within (0, 1]"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: f64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn minimum_requests(mut self, minimum: usize) -> Self {
        self.config.minimum_requests = minimum;
        self
    }

    pub fn window_size(mut self, size: usize) -> Self {
        self.config.window_size = size;
        self
    }

    pub fn window_duration(mut self, duration: Duration) -> Self {
        self.config.window_duration = duration;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn half_open_admission(mut self, fraction: f64) -> Self {
        self.config.half_open_admission = fraction;
        self
    }

    pub fn trigger_categories<I: IntoIterator<Item = ErrorCategory>>(mut self, categories: I) -> Self {
        self.config.trigger_categories = categories.into_iter().collect();
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// A call refused by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerRejection {
    pub state: CircuitState,
    /// Suggested wait before trying again
    pub retry_after: Duration,
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub window_len: usize,
    pub window_failures: usize,
    pub failure_rate: f64,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub since_last_transition: Duration,
}

#[derive(Debug, Clone, Copy)]
struct CallOutcome {
    at: Instant,
    success: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window: VecDeque<CallOutcome>,
    consecutive_successes: u32,
    last_transition: Instant,
    total_calls: u64,
    rejected_calls: u64,
}

impl BreakerState {
    fn failures(&self) -> usize {
        self.window.iter().filter(|o| !o.success).count()
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.failures() as f64 / self.window.len() as f64
        }
    }
}

/// Circuit breaker guarding one remote target.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    target: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("target", &self.target)
            .field("state", &inner.state)
            .field("window_len", &inner.window.len())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Breaker for `target` using the system clock.
    pub fn new<S: Into<String>>(target: S, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(target, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Breaker with a custom clock (useful for testing)
    pub fn with_clock<S: Into<String>>(target: S, config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::closed(target, config, clock))
    }

    /// Closed breaker over an already validated config.
    fn closed<S: Into<String>>(target: S, config: CircuitBreakerConfig, clock: C) -> Self {
        let now = clock.now();
        Self {
            target: target.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                consecutive_successes: 0,
                last_transition: now,
                total_calls: 0,
                rejected_calls: 0,
            }),
            clock,
        }
    }

    /// Name of the protected target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The breaker's configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, applying a pending open→half-open transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.refresh(&mut inner, now);
        inner.state
    }

    /// Decide whether a call may proceed. Rejections are not recorded in the
    /// outcome window.
    pub fn try_acquire(&self) -> Result<(), BreakerRejection> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.refresh(&mut inner, now);

        match inner.state {
            CircuitState::Closed => {
                inner.total_calls += 1;
                Ok(())
            }
            CircuitState::Open => {
                inner.rejected_calls += 1;
                let waited = now.saturating_duration_since(inner.last_transition);
                let retry_after = self.config.timeout.saturating_sub(waited);
                let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                debug!(target = %self.target, retry_after_ms, "Circuit open, rejecting call");
                Err(BreakerRejection { state: CircuitState::Open, retry_after })
            }
            CircuitState::HalfOpen => {
                if rand::thread_rng().gen_bool(self.config.half_open_admission) {
                    inner.total_calls += 1;
                    debug!(target = %self.target, "Half-open probe admitted");
                    Ok(())
                } else {
                    inner.rejected_calls += 1;
                    let retry_after = (self.config.timeout / 10).max(Duration::from_millis(100));
                    Err(BreakerRejection { state: CircuitState::HalfOpen, retry_after })
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.refresh(&mut inner, now);

        match inner.state {
            CircuitState::Closed => self.push_outcome(&mut inner, now, true),
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            // Late response from a call admitted before the trip.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call with its classified category.
    pub fn record_failure(&self, category: ErrorCategory) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.refresh(&mut inner, now);
        let triggers = self.config.trigger_categories.contains(&category);

        match inner.state {
            CircuitState::Closed => {
                self.push_outcome(&mut inner, now, false);
                if triggers
                    && inner.window.len() >= self.config.minimum_requests
                    && inner.failure_rate() >= self.config.failure_threshold
                {
                    warn!(
                        target = %self.target,
                        failure_rate = inner.failure_rate(),
                        window = inner.window.len(),
                        category = %category,
                        "Failure threshold reached, opening circuit"
                    );
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            // A rejection from another breaker says nothing about this target.
            CircuitState::HalfOpen if category != ErrorCategory::CircuitOpen => {
                warn!(target = %self.target, category = %category, "Probe failed, re-opening circuit");
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Run `operation` under breaker protection.
    ///
    /// Open-circuit rejections become [`ServiceError::CircuitOpen`]; the
    /// operation's own errors are classified and recorded.
    #[instrument(skip(self, operation), fields(target = %self.target))]
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        if let Err(rejection) = self.try_acquire() {
            return Err(ServiceError::CircuitOpen {
                target: self.target.clone(),
                retry_after: rejection.retry_after,
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                match &error {
                    // Neither outcome says anything about the target's health.
                    ServiceError::Cancelled | ServiceError::CircuitOpen { .. } => {}
                    other => self.record_failure(classify(other).category),
                }
                Err(error)
            }
        }
    }

    /// Snapshot of the breaker's counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.refresh(&mut inner, now);
        CircuitBreakerMetrics {
            state: inner.state,
            window_len: inner.window.len(),
            window_failures: inner.failures(),
            failure_rate: inner.failure_rate(),
            consecutive_successes: inner.consecutive_successes,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            since_last_transition: now.saturating_duration_since(inner.last_transition),
        }
    }

    /// Force the breaker back to closed with an empty window.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.transition(&mut inner, CircuitState::Closed, now);
    }

    fn refresh(&self, inner: &mut BreakerState, now: Instant) {
        self.prune(inner, now);
        if inner.state == CircuitState::Open
            && now.saturating_duration_since(inner.last_transition) >= self.config.timeout
        {
            self.transition(inner, CircuitState::HalfOpen, now);
        }
    }

    fn prune(&self, inner: &mut BreakerState, now: Instant) {
        while inner
            .window
            .front()
            .is_some_and(|o| now.saturating_duration_since(o.at) > self.config.window_duration)
        {
            inner.window.pop_front();
        }
        while inner.window.len() > self.config.window_size {
            inner.window.pop_front();
        }
    }

    fn push_outcome(&self, inner: &mut BreakerState, now: Instant, success: bool) {
        inner.window.push_back(CallOutcome { at: now, success });
        self.prune(inner, now);
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition = now;
        inner.consecutive_successes = 0;
        inner.window.clear();
        if from != to {
            info!(target = %self.target, from = %from, to = %to, "Circuit state changed");
        }
    }
}

/// One breaker per named target, created lazily from a shared config.
pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    config: CircuitBreakerConfig,
    clock: C,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker<C>>>>,
}

impl CircuitBreakerRegistry<SystemClock> {
    /// Create a registry on the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    /// Create a registry whose breakers share `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, clock, breakers: Mutex::new(HashMap::new()) })
    }

    /// Breaker for `target`, creating it on first use.
    pub fn get(&self, target: &str) -> Arc<CircuitBreaker<C>> {
        let mut breakers = self.breakers.lock();
        if let Some(breaker) = breakers.get(target) {
            return Arc::clone(breaker);
        }
        let breaker = Arc::new(CircuitBreaker::closed(target, self.config.clone(), self.clock.clone()));
        breakers.insert(target.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Metrics of every breaker created so far, sorted by target.
    pub fn metrics(&self) -> Vec<(String, CircuitBreakerMetrics)> {
        let breakers: Vec<_> = self.breakers.lock().values().cloned().collect();
        let mut all: Vec<_> = breakers.iter().map(|b| (b.target.clone(), b.metrics())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
