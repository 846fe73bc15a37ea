//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - TOML configuration file (`FEED_CONFIG`, or the first of the default paths)
//! - Environment variables `FEED__<SECTION>__<KEY>`
//! - `FEED_HOST` / `FEED_PORT`

use anyhow::{Context, Result};
use feed_consumer::ConsumerConfig;
use feed_core::{PaginationMode, ReaderConfig, SqliteConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATHS: [&str; 3] = [
    "feed.toml",
    "/etc/feed/feed.toml",
    "~/.config/feed/feed.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub consumer: ConsumerSettings,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Timeline database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file, or `:memory:`.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Maximum open connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Lock wait in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

/// Read path and fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Page size when the request names none.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Largest page size served.
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,

    /// Cursor kind issued for first pages.
    #[serde(default)]
    pub pagination: PaginationMode,

    /// Followers inserted per batch.
    #[serde(default = "default_chunk_size")]
    pub fanout_chunk_size: usize,
}

/// Inbound notification consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Run the consumer loop.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    #[serde(default = "default_stream")]
    pub stream: String,

    #[serde(default = "default_subject")]
    pub subject: String,

    #[serde(default = "default_durable_name")]
    pub durable_name: String,

    /// Poll timeout in milliseconds; bounds shutdown latency.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,

    /// Attempts before a notification is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,

    /// Redelivery delay in milliseconds.
    #[serde(default = "default_redelivery_delay")]
    pub redelivery_delay_ms: u64,

    /// Cap on the redelivery delay while the store is failing, in milliseconds.
    #[serde(default = "default_max_redelivery_delay")]
    pub max_redelivery_delay_ms: u64,

    #[serde(default = "default_dead_letter_subject")]
    pub dead_letter_subject: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("feed.db")
}

fn default_pool_size() -> usize {
    8
}

fn default_busy_timeout() -> u64 {
    5_000
}

fn default_limit() -> u32 {
    feed_core::reader::DEFAULT_LIMIT
}

fn default_max_limit() -> u32 {
    feed_core::reader::MAX_LIMIT
}

fn default_chunk_size() -> usize {
    feed_core::fanout::DEFAULT_CHUNK_SIZE
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_stream() -> String {
    "content-posts".to_string()
}

fn default_subject() -> String {
    "content.post.created".to_string()
}

fn default_durable_name() -> String {
    "feed-fanout".to_string()
}

fn default_poll_timeout() -> u64 {
    250
}

fn default_max_attempts() -> u64 {
    5
}

fn default_redelivery_delay() -> u64 {
    1_000
}

fn default_max_redelivery_delay() -> u64 {
    30_000
}

fn default_dead_letter_subject() -> String {
    "content.post.created.dlq".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage: StorageConfig::default(),
            feed: FeedConfig::default(),
            consumer: ConsumerSettings::default(),
            metrics: MetricsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            pagination: PaginationMode::default(),
            fanout_chunk_size: default_chunk_size(),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            nats_url: default_nats_url(),
            stream: default_stream(),
            subject: default_subject(),
            durable_name: default_durable_name(),
            poll_timeout_ms: default_poll_timeout(),
            max_attempts: default_max_attempts(),
            redelivery_delay_ms: default_redelivery_delay(),
            max_redelivery_delay_ms: default_max_redelivery_delay(),
            dead_letter_subject: default_dead_letter_subject(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn sqlite(&self) -> SqliteConfig {
        SqliteConfig {
            path: self.path.clone(),
            pool_size: self.pool_size,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}

impl FeedConfig {
    #[must_use]
    pub fn reader(&self) -> ReaderConfig {
        ReaderConfig {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
            mode: self.pagination,
        }
    }
}

impl ConsumerSettings {
    #[must_use]
    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            max_attempts: self.max_attempts.max(1),
            redelivery_delay: Duration::from_millis(self.redelivery_delay_ms),
            max_redelivery_delay: Duration::from_millis(
                self.max_redelivery_delay_ms.max(self.redelivery_delay_ms),
            ),
        }
    }
}

impl Config {
    /// Load configuration from file, environment and defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file named by `FEED_CONFIG` is missing,
    /// or if any source cannot be parsed.
    pub fn load() -> Result<Self> {
        let path = match std::env::var("FEED_CONFIG") {
            Ok(path) => Some(PathBuf::from(shellexpand::tilde(&path).as_ref())),
            Err(_) => CONFIG_PATHS
                .iter()
                .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
                .find(|path| path.exists()),
        };

        let mut config = Self::from_sources(path.as_deref(), environment())?;

        if let Ok(host) = std::env::var("FEED_HOST") {
            config.host = host;
        }
        if let Some(port) = std::env::var("FEED_PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }

        Ok(config)
    }

    /// Build configuration from an optional file and an environment source.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type.
    pub fn from_sources(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let layered = builder
            .add_source(env)
            .build()
            .context("Failed to load configuration")?;

        layered.try_deserialize().with_context(|| match path {
            Some(path) => format!("Invalid configuration in {}", path.display()),
            None => "Invalid configuration in environment".to_string(),
        })
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

/// `FEED__SECTION__KEY` variables.
fn environment() -> config::Environment {
    config::Environment::with_prefix("FEED")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.feed.default_limit, 20);
        assert_eq!(config.feed.max_limit, 100);
        assert_eq!(config.feed.pagination, PaginationMode::Offset);
        assert!(!config.consumer.enabled);
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [storage]
            path = ":memory:"

            [feed]
            pagination = "keyset"
            max_limit = 50

            [consumer]
            enabled = true
            max_attempts = 3
            max_redelivery_delay_ms = 10000

            [log]
            format = "json"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.storage.path, PathBuf::from(":memory:"));
        assert_eq!(config.storage.pool_size, 8);
        assert_eq!(config.feed.reader().mode, PaginationMode::Keyset);
        assert_eq!(config.feed.reader().max_limit, 50);
        assert_eq!(config.feed.default_limit, 20);
        assert!(config.consumer.enabled);
        assert_eq!(config.consumer.consumer().max_attempts, 3);
        assert_eq!(config.consumer.consumer().poll_timeout, Duration::from_millis(250));
        assert_eq!(
            config.consumer.consumer().max_redelivery_delay,
            Duration::from_secs(10)
        );
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.toml");
        std::fs::write(&path, "port = 9000\n[storage]\npool_size = 2\n").unwrap();

        let config = Config::from_sources(
            Some(&path),
            env(&[("FEED__STORAGE__POOL_SIZE", "16"), ("FEED__FEED__PAGINATION", "keyset")]),
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.storage.pool_size, 16);
        assert_eq!(config.feed.pagination, PaginationMode::Keyset);
    }

    #[test]
    fn test_missing_required_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(Config::from_sources(Some(&missing), env(&[])).is_err());
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let result = Config::from_sources(None, env(&[("FEED__FEED__PAGINATION", "random")]));
        assert!(result.is_err());
    }
}
