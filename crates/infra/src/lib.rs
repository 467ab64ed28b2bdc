//! # Scribeflow Infrastructure
//!
//! Infrastructure implementations of core ports and process wiring.
//!
//! This crate contains:
//! - Configuration loading (`.env`, TOML/JSON files, environment overrides)
//! - Logging initialisation on `tracing-subscriber`
//! - A JSON-file persistence store
//! - A tracing-backed notification sink
//! - The driver that runs the orchestrator's background loops
//!
//! ## Architecture
//! - Implements traits defined in `scribeflow-core`
//! - Contains all "impure" code (file I/O, global subscriber, timers)

pub mod config;
pub mod driver;
pub mod errors;
pub mod logging;
pub mod notifications;
pub mod persistence;

// Re-export commonly used items
pub use config::{apply_env_overrides, load_config, load_from_file, probe_config_paths};
pub use driver::{DriverConfig, OrchestratorDriver};
pub use errors::{InfraError, InfraResult};
pub use logging::init_logging;
pub use notifications::TracingNotificationSink;
pub use persistence::JsonFileStore;
