//! Background driver for the orchestrator.
//!
//! The orchestrator itself never spawns timers; this driver runs its
//! periodic work under one cancellation token:
//!
//! | loop | period |
//! |---|---|
//! | scheduler tick | `scheduler.tick_interval` |
//! | retention cleanup | `scheduler.cleanup_interval` |
//! | recovery sweep | `recovery.sweep_interval` |
//! | rate-limiter sweep | `rate_limiter.sweep_interval` |
//!
//! Join handles are tracked, cancellation is explicit, and stopping waits
//! for every loop with a timeout.
//!
//! # Example
//!
//! ```no_run
//! use scribeflow_core::Orchestrator;
//! use scribeflow_infra::{OrchestratorDriver, InfraResult};
//!
//! # async fn example(orchestrator: Orchestrator) -> InfraResult<()> {
//! let mut driver = OrchestratorDriver::new(orchestrator);
//! driver.start().await?;
//! // ... application runs ...
//! driver.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use scribeflow_common::{Clock, SystemClock};
use scribeflow_core::Orchestrator;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::{InfraError, InfraResult};

/// Driver lifecycle settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Restore persisted jobs and parked records on start
    pub restore_on_start: bool,
    /// Timeout for awaiting each loop on stop
    pub join_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { restore_on_start: true, join_timeout: Duration::from_secs(5) }
    }
}

/// Runs the orchestrator's periodic loops.
pub struct OrchestratorDriver<C: Clock + Clone = SystemClock> {
    orchestrator: Orchestrator<C>,
    config: DriverConfig,
    cancellation: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl<C: Clock + Clone> OrchestratorDriver<C> {
    /// Driver with default intervals.
    pub fn new(orchestrator: Orchestrator<C>) -> Self {
        Self::with_config(orchestrator, DriverConfig::default())
    }

    /// Driver with explicit intervals.
    pub fn with_config(orchestrator: Orchestrator<C>, config: DriverConfig) -> Self {
        Self { orchestrator, config, cancellation: CancellationToken::new(), handles: Vec::new() }
    }

    /// The driven orchestrator.
    pub fn orchestrator(&self) -> &Orchestrator<C> {
        &self.orchestrator
    }

    /// Returns true while any loop is alive.
    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|handle| !handle.is_finished())
    }

    /// Restore state (if configured) and spawn every loop.
    ///
    /// # Errors
    /// - `AlreadyRunning` when called twice without `stop`
    /// - `Orchestrator` when restoring from the store fails
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> InfraResult<()> {
        if self.is_running() {
            return Err(InfraError::AlreadyRunning);
        }

        if self.config.restore_on_start {
            let (jobs, records) = self.orchestrator.restore().await?;
            info!(jobs, records, "Restored persisted state");
        }

        self.cancellation = CancellationToken::new();
        let config = self.orchestrator.config().clone();

        let orchestrator = self.orchestrator.clone();
        self.handles.push(spawn_periodic("tick", config.scheduler.tick_interval, self.cancellation.clone(), move || {
            let orchestrator = orchestrator.clone();
            async move {
                let started = orchestrator.tick();
                if started > 0 {
                    debug!(started, "Dispatched jobs");
                }
            }
        }));

        let orchestrator = self.orchestrator.clone();
        self.handles.push(spawn_periodic(
            "cleanup",
            config.scheduler.cleanup_interval,
            self.cancellation.clone(),
            move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.cleanup().await;
                }
            },
        ));

        let orchestrator = self.orchestrator.clone();
        self.handles.push(spawn_periodic(
            "recovery-sweep",
            config.recovery.sweep_interval,
            self.cancellation.clone(),
            move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.sweep().await;
                }
            },
        ));

        self.handles.push(self.orchestrator.guard().limiter().spawn_sweeper(self.cancellation.clone()));

        info!(loops = self.handles.len(), "Orchestrator driver started");
        Ok(())
    }

    /// Cancel every loop and wait for them to finish. In-flight jobs keep
    /// running; call [`Orchestrator::shutdown`] to stop them as well.
    ///
    /// # Errors
    /// - `NotRunning` when the driver was not started
    /// - `Timeout` when a loop does not exit within `join_timeout`
    /// - `TaskJoin` when a loop panicked
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> InfraResult<()> {
        if !self.is_running() {
            return Err(InfraError::NotRunning);
        }

        self.cancellation.cancel();

        let join_timeout = self.config.join_timeout;
        for handle in self.handles.drain(..) {
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|_| InfraError::Timeout { duration: join_timeout })??;
        }

        info!("Orchestrator driver stopped");
        self.cancellation = CancellationToken::new();
        Ok(())
    }
}

/// Run `work` every `period` until `token` is cancelled. Each run finishes
/// before the next is scheduled.
fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, token: CancellationToken, work: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(task = name, "Driver loop stopped");
                    break;
                }
                _ = interval.tick() => {
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = work() => {}
                    }
                }
            }
        }
    })
}

impl<C: Clock + Clone> Drop for OrchestratorDriver<C> {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("OrchestratorDriver dropped while running; cancelling loops");
            self.cancellation.cancel();
        }
    }
}
