//! # Scribeflow Core
//!
//! Orchestration logic for transcription jobs - no infrastructure
//! dependencies.
//!
//! This crate contains:
//! - Port interfaces for the remote service and other collaborators
//! - The job scheduler, progress tracker, result collector and recovery
//!   orchestrator
//! - A typed event bus for lifecycle and recovery events
//! - An [`Orchestrator`] factory wiring default instances together
//!
//! ## Architecture Principles
//! - Only depends on `scribeflow-common` and `scribeflow-domain`
//! - No HTTP, file or platform code
//! - All external dependencies via traits
//! - Time flows through the `Clock` abstraction so behavior is testable

pub mod collector;
pub mod events;
pub mod guard;
pub mod orchestrator;
pub mod ports;
pub mod recovery;
pub mod scheduler;
pub mod tracker;
mod time;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use collector::ResultCollector;
pub use events::{EventBus, OrchestratorEvent, RecoveryNotification};
pub use guard::ServiceGuard;
pub use orchestrator::{Collaborators, Orchestrator};
pub use ports::{
    BasicRequestValidator, CredentialProvider, Credentials, JobResubmitter, NoopNotificationSink,
    NotificationSink, PersistenceStore, RequestValidator, ResultFetcher, StaticCredentials,
    StatusQuery, SubmissionGateway, ValidationOutcome,
};
pub use recovery::{RecoveryDecision, RecoveryOrchestrator, SweepReport};
pub use scheduler::{JobScheduler, PipelineComponents};
pub use tracker::{MonitorOutcome, ProgressEstimator, ProgressObserver, ProgressTracker, StopReason};
