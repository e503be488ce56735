//! Config loading, TOML parsing, and env var override tests.
//!
//! Some tests are `#[ignore]` (they chdir or set env vars and conflict in
//! parallel). Run them with:
//! `cargo test --test config_tests -- --ignored --test-threads=1`

use querygate::Config;
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

// Default Configuration Tests
#[test]
fn test_config_default_execution() {
    let config = Config::default();
    assert_eq!(config.execution.workers, 0);
    assert!(config.execution.worker_count() >= 1);
    assert_eq!(config.execution.time_limit(false), None);
    assert_eq!(config.execution.time_limit(true), None);
    assert!(config.execution.annotate_queries);
}

#[test]
fn test_config_default_retention() {
    let config = Config::default();
    assert_eq!(config.execution.job_expiry(), Duration::from_secs(12 * 60 * 60));
    assert_eq!(
        config.execution.failure_ttl(),
        Duration::from_secs(7 * 24 * 60 * 60)
    );
}

#[test]
fn test_config_default_cache_and_logging() {
    let config = Config::default();
    assert_eq!(config.cache.max_entries, 1000);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, "text");
}

// TOML File Parsing Tests
#[test]
fn test_load_config_from_file() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("querygate.toml");

    let config_content = r#"
[execution]
workers = 3
adhoc_time_limit_secs = 300
scheduled_time_limit_secs = 3600
annotate_queries = false

[cache]
max_entries = 50

[logging]
level = "debug"
format = "json"
"#;
    fs::write(&config_path, config_content).unwrap();

    let config = Config::from_file(&config_path.to_string_lossy()).unwrap();

    assert_eq!(config.execution.worker_count(), 3);
    assert_eq!(
        config.execution.time_limit(false),
        Some(Duration::from_secs(300))
    );
    assert_eq!(
        config.execution.time_limit(true),
        Some(Duration::from_secs(3600))
    );
    assert!(!config.execution.annotate_queries);
    assert_eq!(config.cache.max_entries, 50);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_partial_file_keeps_defaults() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("partial.toml");
    fs::write(&config_path, "[cache]\nmax_entries = 5\n").unwrap();

    let config = Config::from_file(&config_path.to_string_lossy()).unwrap();

    assert_eq!(config.cache.max_entries, 5);
    assert_eq!(config.execution, Config::default().execution);
    assert_eq!(config.logging, Config::default().logging);
}

#[test]
fn test_missing_file_yields_defaults() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("absent.toml");

    let config = Config::from_file(&config_path.to_string_lossy()).unwrap();
    assert_eq!(config.cache, Config::default().cache);
}

#[test]
fn test_invalid_value_is_an_error() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("bad.toml");
    fs::write(&config_path, "[execution]\nworkers = \"many\"\n").unwrap();

    assert!(Config::from_file(&config_path.to_string_lossy()).is_err());
}

#[test]
#[ignore = "Requires --test-threads=1 due to directory change"]
fn test_local_file_overrides_base() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("querygate.toml"),
        "[execution]\nworkers = 2\n\n[cache]\nmax_entries = 10\n",
    )
    .unwrap();
    fs::write(
        temp.path().join("querygate.local.toml"),
        "[execution]\nworkers = 6\n",
    )
    .unwrap();

    let original_dir = env::current_dir().unwrap();
    env::set_current_dir(temp.path()).unwrap();
    let config = Config::load();
    env::set_current_dir(original_dir).unwrap();

    let config = config.unwrap();
    assert_eq!(config.execution.workers, 6);
    assert_eq!(config.cache.max_entries, 10);
}

// Environment Variable Override Tests
#[test]
#[ignore = "Requires --test-threads=1 due to env var mutation"]
fn test_env_overrides_file() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("querygate.toml");
    fs::write(&config_path, "[execution]\nworkers = 2\n").unwrap();

    env::set_var("QUERYGATE_EXECUTION__WORKERS", "8");
    env::set_var("QUERYGATE_LOGGING__LEVEL", "trace");
    let config = Config::from_file(&config_path.to_string_lossy());
    env::remove_var("QUERYGATE_EXECUTION__WORKERS");
    env::remove_var("QUERYGATE_LOGGING__LEVEL");

    let config = config.unwrap();
    assert_eq!(config.execution.workers, 8);
    assert_eq!(config.logging.level, "trace");
}

// Serialization
#[test]
fn test_effective_config_renders_as_toml() {
    let config = Config::default();
    let rendered = toml::to_string_pretty(&config).unwrap();
    assert!(rendered.contains("[execution]"));
    assert!(rendered.contains("max_entries = 1000"));

    let parsed: Config = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed, config);
}
