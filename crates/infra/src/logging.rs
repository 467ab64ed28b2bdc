//! Logging initialisation
//!
//! Installs a global `tracing` subscriber with an `EnvFilter` and either
//! human-readable or JSON output. `RUST_LOG` takes precedence over the
//! configured level.

use scribeflow_domain::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::errors::{InfraError, InfraResult};

/// Build the filter: `RUST_LOG` if set and valid, else `config.level`.
pub fn build_filter(config: &LoggingConfig) -> InfraResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| InfraError::Logging(format!("invalid log level '{}': {e}", config.level))),
    }
}

/// Install the global subscriber.
///
/// # Errors
/// Returns `InfraError::Logging` when the level is not a valid filter or a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> InfraResult<()> {
    let filter = build_filter(config)?;

    let layer = if config.json {
        fmt::layer().json().with_current_span(false).with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| InfraError::Logging(e.to_string()))?;

    tracing::debug!(level = %config.level, json = config.json, "Logging initialised");
    Ok(())
}
