//! Engine configuration.
//!
//! Read from the `[queue]` table of a TOML file:
//!
//! ```toml
//! [queue]
//! enabled = true
//! concurrency = 10
//! max-retry = 3
//! timeout = 1800
//! retention = 0
//!
//! [queue.queues]
//! critical = 6
//! default = 3
//! low = 1
//! ```
//!
//! Missing keys fall back to [`EngineConfig::default`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DEFAULT_QUEUE, is_valid_queue_name};
use crate::queue::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Queue engine settings. Durations are whole seconds unless the key ends in `-ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// When false the worker pool and scheduler are not started.
    pub enabled: bool,
    pub concurrency: usize,

    /// Lane name -> weight.
    pub queues: BTreeMap<String, u32>,

    pub max_retry: u32,
    pub timeout: u64,
    pub retention: u64,

    pub shutdown_grace: u64,
    pub poll_interval_ms: u64,
    pub forward_interval_ms: u64,
    pub reaper_interval_ms: u64,

    /// Extra time past `timeout` before an Active task is considered lost.
    pub lease_margin: u64,

    pub cron_tick_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub retry_jitter: f64,
    pub store_retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 10,
            queues: BTreeMap::from([(DEFAULT_QUEUE.to_string(), 1)]),
            max_retry: 3,
            timeout: 30 * 60,
            retention: 0,
            shutdown_grace: 8,
            poll_interval_ms: 1_000,
            forward_interval_ms: 5_000,
            reaper_interval_ms: 60_000,
            lease_margin: 30,
            cron_tick_ms: 1_000,
            retry_base_ms: 1_000,
            retry_max_ms: 60 * 60 * 1_000,
            retry_jitter: 0.1,
            store_retry_attempts: 5,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    queue: EngineConfig,
}

impl EngineConfig {
    /// Parse the `[queue]` table out of a TOML document and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, Path::new("<inline>"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        file.queue.validate()?;
        Ok(file.queue)
    }

    /// Load the file selected by `BUILD_MODE` from `dir`.
    ///
    /// Falls back to `config.toml`, then to defaults when neither file exists.
    pub fn from_build_mode(dir: &Path) -> Result<Self, ConfigError> {
        let mode = std::env::var("BUILD_MODE").unwrap_or_else(|_| "dev".to_string());
        let preferred = dir.join(config_file_name(&mode));
        if preferred.exists() {
            tracing::info!(mode = %mode, path = %preferred.display(), "loading config");
            return Self::load(&preferred);
        }

        let fallback = dir.join("config.toml");
        if fallback.exists() {
            tracing::info!(mode = %mode, path = %fallback.display(), "loading fallback config");
            return Self::load(&fallback);
        }

        tracing::info!(mode = %mode, "no config file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.queues.is_empty() {
            return Err(ConfigError::Invalid("at least one queue is required".into()));
        }
        for (name, weight) in &self.queues {
            if !is_valid_queue_name(name) {
                return Err(ConfigError::Invalid(format!("invalid queue name '{name}'")));
            }
            if *weight == 0 {
                return Err(ConfigError::Invalid(format!(
                    "queue '{name}' must have a positive weight"
                )));
            }
        }
        if self.timeout == 0 {
            return Err(ConfigError::Invalid("timeout must be at least 1 second".into()));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ConfigError::Invalid(format!(
                "retry-jitter must be within 0..=1, got {}",
                self.retry_jitter
            )));
        }
        if self.retry_base_ms > self.retry_max_ms {
            return Err(ConfigError::Invalid(
                "retry-base-ms must not exceed retry-max-ms".into(),
            ));
        }
        if self.poll_interval_ms == 0
            || self.forward_interval_ms == 0
            || self.reaper_interval_ms == 0
            || self.cron_tick_ms == 0
        {
            return Err(ConfigError::Invalid("loop intervals must be positive".into()));
        }
        Ok(())
    }

    /// Lanes in scan order: heaviest first, ties by name.
    pub fn queue_weights(&self) -> Vec<(String, u32)> {
        let mut weights: Vec<(String, u32)> =
            self.queues.iter().map(|(k, v)| (k.clone(), *v)).collect();
        weights.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        weights
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_max_ms),
        )
        .with_jitter(self.retry_jitter)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.retention)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn forward_interval(&self) -> Duration {
        Duration::from_millis(self.forward_interval_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn lease_margin(&self) -> Duration {
        Duration::from_secs(self.lease_margin)
    }

    pub fn cron_tick(&self) -> Duration {
        Duration::from_millis(self.cron_tick_ms)
    }
}

fn config_file_name(mode: &str) -> &'static str {
    match mode {
        "pro" | "prod" | "production" => "config.pro.toml",
        "test" | "testing" => "config.test.toml",
        _ => "config.toml",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn queue_table_overrides_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [queue]
            concurrency = 4
            max-retry = 5
            timeout = 60

            [queue.queues]
            critical = 6
            default = 3
            low = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_retry, 5);
        assert_eq!(config.task_timeout(), Duration::from_secs(60));
        assert_eq!(config.retention, 0);
        assert_eq!(
            config.queue_weights(),
            vec![
                ("critical".to_string(), 6),
                ("default".to_string(), 3),
                ("low".to_string(), 1)
            ]
        );
    }

    #[rstest]
    #[case::zero_concurrency("[queue]\nconcurrency = 0")]
    #[case::zero_weight("[queue.queues]\ncritical = 0")]
    #[case::jitter("[queue]\nretry-jitter = 1.5")]
    #[case::backoff_bounds("[queue]\nretry-base-ms = 10\nretry-max-ms = 5")]
    #[case::zero_timeout("[queue]\ntimeout = 0")]
    #[case::zero_reaper_interval("[queue]\nreaper-interval-ms = 0")]
    fn invalid_values_are_rejected(#[case] doc: &str) {
        assert!(matches!(
            EngineConfig::from_toml_str(doc),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_toml_str("[queue\nconcurrency = "),
            Err(ConfigError::Toml { .. })
        ));
    }

    #[rstest]
    #[case("pro", "config.pro.toml")]
    #[case("production", "config.pro.toml")]
    #[case("testing", "config.test.toml")]
    #[case("dev", "config.toml")]
    fn build_mode_selects_file(#[case] mode: &str, #[case] file: &str) {
        assert_eq!(config_file_name(mode), file);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = EngineConfig::load(Path::new("/nonexistent/bobbin.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
