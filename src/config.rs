//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - querygate.toml (default configuration)
//! - querygate.local.toml (git-ignored local overrides)
//! - Environment variables (QUERYGATE_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # querygate.toml
//! [execution]
//! workers = 4
//! adhoc_time_limit_secs = 300
//!
//! [cache]
//! max_entries = 5000
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUERYGATE_EXECUTION__WORKERS=8
//! QUERYGATE_LOGGING__FORMAT=json
//! ```

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker pool, time limits and job retention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Worker threads (0 = number of CPUs)
    #[serde(default)]
    pub workers: usize,

    /// Time limit for ad-hoc runs in seconds (0 = unlimited)
    #[serde(default)]
    pub adhoc_time_limit_secs: u64,

    /// Time limit for scheduled runs in seconds (0 = unlimited)
    #[serde(default)]
    pub scheduled_time_limit_secs: u64,

    /// Retention of finished jobs and of their dedupe entry
    #[serde(default = "default_job_expiry_secs")]
    pub job_expiry_secs: u64,

    /// Retention of failed and cancelled jobs
    #[serde(default = "default_failure_ttl_secs")]
    pub failure_ttl_secs: u64,

    /// Prefix executed text with a metadata comment
    #[serde(default = "default_true")]
    pub annotate_queries: bool,
}

impl ExecutionConfig {
    /// Number of worker threads to start.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub fn time_limit(&self, scheduled: bool) -> Option<Duration> {
        let secs = if scheduled {
            self.scheduled_time_limit_secs
        } else {
            self.adhoc_time_limit_secs
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    pub fn job_expiry(&self) -> Duration {
        Duration::from_secs(self.job_expiry_secs)
    }

    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_secs)
    }
}

/// Result cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached results before LRU eviction
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_job_expiry_secs() -> u64 {
    43_200 // 12 hours
}
fn default_failure_ttl_secs() -> u64 {
    604_800 // 7 days
}
fn default_true() -> bool {
    true
}
fn default_cache_max_entries() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. querygate.toml (base configuration)
    /// 2. querygate.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (QUERYGATE_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("querygate.toml"))
            .merge(Toml::file("querygate.local.toml"))
            .merge(Env::prefixed("QUERYGATE_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUERYGATE_").split("__"))
            .extract()
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            workers: 0,
            adhoc_time_limit_secs: 0,
            scheduled_time_limit_secs: 0,
            job_expiry_secs: default_job_expiry_secs(),
            failure_ttl_secs: default_failure_ttl_secs(),
            annotate_queries: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
