//! Configuration loader
//!
//! ## Loading Strategy
//! 1. Load a `.env` file into the process environment, if one exists
//! 2. Read the file named by `SCRIBEFLOW_CONFIG`, or the first probed
//!    config file, or fall back to defaults
//! 3. Apply `SCRIBEFLOW_*` environment overrides
//! 4. Validate the result
//!
//! Files may be JSON or TOML (detected by extension). Every section is
//! optional; missing fields keep their defaults.
//!
//! ## Environment Overrides
//! - `SCRIBEFLOW_MAX_CONCURRENT_JOBS`: scheduler concurrency
//! - `SCRIBEFLOW_MAX_QUEUE_SIZE`: scheduler queue bound
//! - `SCRIBEFLOW_REQUESTS_PER_MINUTE` / `_HOUR` / `_DAY`: rate limits
//! - `SCRIBEFLOW_LOG_LEVEL`: default log filter
//! - `SCRIBEFLOW_LOG_JSON`: JSON log output (true/false)
//! - `SCRIBEFLOW_PERSISTENCE_PATH`: directory for the JSON store
//!
//! ## File Locations
//! The loader probes, in order, `scribeflow.{toml,json}` then
//! `config.{toml,json}` in the working directory, its parent, and next to
//! the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use scribeflow_domain::OrchestratorConfig;

use crate::errors::{InfraError, InfraResult};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_VAR: &str = "SCRIBEFLOW_CONFIG";

const ENV_PREFIX: &str = "SCRIBEFLOW_";
const FILE_NAMES: [&str; 4] = ["scribeflow.toml", "scribeflow.json", "config.toml", "config.json"];

/// Load configuration with the full fallback strategy.
///
/// # Errors
/// Returns `InfraError::Config` if:
/// - `SCRIBEFLOW_CONFIG` names a missing or unparsable file
/// - A probed file is unparsable
/// - An override has an invalid value
/// - The merged configuration fails validation
pub fn load_config() -> InfraResult<OrchestratorConfig> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) => tracing::debug!(error = %e, "No .env file loaded"),
    }

    let explicit = std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
    let mut config = match explicit.or_else(probe_config_paths) {
        Some(path) => load_from_file(&path)?,
        None => {
            tracing::info!("No config file found, using defaults");
            OrchestratorConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file.
///
/// # Errors
/// Returns `InfraError::Config` if the file is missing, unreadable or
/// invalid.
pub fn load_from_file(path: &Path) -> InfraResult<OrchestratorConfig> {
    if !path.exists() {
        return Err(InfraError::config(format!("Config file not found: {}", path.display())));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| InfraError::config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, path)
}

/// Parse configuration text; the format follows the extension of `path`.
///
/// # Errors
/// Returns `InfraError::Config` if the format is unsupported or parsing
/// fails.
pub fn parse_config(contents: &str, path: &Path) -> InfraResult<OrchestratorConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => Ok(toml::from_str(contents)?),
        "json" => serde_json::from_str(contents)
            .map_err(|e| InfraError::config(format!("Invalid JSON format: {e}"))),
        _ => Err(InfraError::config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file among the standard locations.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join(".."));
        dirs.insert(0, cwd);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Apply `SCRIBEFLOW_*` overrides on top of `config`.
///
/// # Errors
/// Returns `InfraError::Config` when a variable is set to a value that
/// does not parse.
pub fn apply_env_overrides(config: &mut OrchestratorConfig) -> InfraResult<()> {
    if let Some(value) = env_parse("MAX_CONCURRENT_JOBS")? {
        config.scheduler.max_concurrent_jobs = value;
    }
    if let Some(value) = env_parse("MAX_QUEUE_SIZE")? {
        config.scheduler.max_queue_size = value;
    }
    if let Some(value) = env_parse("REQUESTS_PER_MINUTE")? {
        config.rate_limiter.requests_per_minute = value;
    }
    if let Some(value) = env_parse("REQUESTS_PER_HOUR")? {
        config.rate_limiter.requests_per_hour = value;
    }
    if let Some(value) = env_parse("REQUESTS_PER_DAY")? {
        config.rate_limiter.requests_per_day = value;
    }
    if let Some(level) = env_string("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env_string("LOG_JSON") {
        config.logging.json = parse_bool(&json);
    }
    if let Some(path) = env_string("PERSISTENCE_PATH") {
        config.persistence_path = Some(PathBuf::from(path));
    }
    Ok(())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> InfraResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| InfraError::config(format!("Invalid {ENV_PREFIX}{name} value '{raw}': {e}")))
        })
        .transpose()
}

/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
