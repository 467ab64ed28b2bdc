//! Configuration loading
//!
//! Loads the orchestrator configuration from files and the environment.

pub mod loader;

// Re-export commonly used items
pub use loader::{
    apply_env_overrides, load_config, load_from_file, parse_config, probe_config_paths, CONFIG_PATH_VAR,
};
