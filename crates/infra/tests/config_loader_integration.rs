//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files.

use std::time::Duration;

use scribeflow_common::RetryStrategy;
use scribeflow_infra::config;
use tempfile::TempDir;

#[test]
fn test_load_config_from_toml_file() {
    let toml_content = r#"
persistence_path = "/var/lib/scribeflow"

[scheduler]
max_concurrent_jobs = 5
max_queue_size = 50
tick_interval = 500
max_retries = 4

[tracker]
base_interval = 2000
max_interval = 30000
max_poll_attempts = 100

[retry]
max_attempts = 4
strategy = "linear"
base_delay = 250

[circuit_breaker]
failure_threshold = 0.6
minimum_requests = 10

[rate_limiter]
requests_per_minute = 20
max_concurrent = 4

[logging]
level = "scribeflow=debug,info"
json = true
"#;

    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("scribeflow.toml");
    std::fs::write(&path, toml_content).expect("Failed to write config");

    let config = config::load_from_file(&path).expect("Failed to load config from TOML file");

    assert_eq!(config.scheduler.max_concurrent_jobs, 5);
    assert_eq!(config.scheduler.max_queue_size, 50);
    assert_eq!(config.scheduler.tick_interval, Duration::from_millis(500));
    assert_eq!(config.scheduler.max_retries, 4);
    assert_eq!(config.tracker.base_interval, Duration::from_secs(2));
    assert_eq!(config.tracker.max_poll_attempts, 100);
    assert_eq!(config.retry.max_attempts, 4);
    assert_eq!(config.retry.strategy, RetryStrategy::Linear);
    assert_eq!(config.retry.base_delay, Duration::from_millis(250));
    assert!((config.circuit_breaker.failure_threshold - 0.6).abs() < f64::EPSILON);
    assert_eq!(config.circuit_breaker.minimum_requests, 10);
    assert_eq!(config.rate_limiter.requests_per_minute, 20);
    assert_eq!(config.rate_limiter.max_concurrent, 4);
    assert!(config.logging.json);
    assert_eq!(config.persistence_path.as_deref(), Some(std::path::Path::new("/var/lib/scribeflow")));
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_config_from_json_file() {
    let json_content = r#"{
        "scheduler": { "max_concurrent_jobs": 2 },
        "recovery": { "max_recovery_attempts": 6, "max_inline_delay": 60000 },
        "collector": { "min_confidence": 0.5 }
    }"#;

    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("config.json");
    std::fs::write(&path, json_content).expect("Failed to write config");

    let config = config::load_from_file(&path).expect("Failed to load config from JSON file");

    assert_eq!(config.scheduler.max_concurrent_jobs, 2);
    assert_eq!(config.recovery.max_recovery_attempts, 6);
    assert_eq!(config.recovery.max_inline_delay, Duration::from_secs(60));
    assert!((config.collector.min_confidence - 0.5).abs() < f64::EPSILON);
    // Untouched sections keep their defaults
    assert_eq!(config.rate_limiter, scribeflow_domain::OrchestratorConfig::default().rate_limiter);
}

#[test]
fn test_invalid_values_fail_validation() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("scribeflow.toml");
    std::fs::write(&path, "[circuit_breaker]\nfailure_threshold = 1.5\n").expect("Failed to write config");

    let config = config::load_from_file(&path).expect("Parsing succeeds");

    assert!(config.validate().is_err());
}
