use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value `{value}` for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

/// Runtime settings, read once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// Compact the log once this many transactions were appended since the last compaction.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    /// Upper bound on waiting for any row lock.
    pub lock_timeout: Duration,
    pub log_level: tracing::Level,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(5),
            log_level: tracing::Level::INFO,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Read `SLOTBOOK_*` environment variables; unset ones keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(bind) = lookup("SLOTBOOK_BIND") {
            config.bind = bind;
        }
        if let Some(dir) = lookup("SLOTBOOK_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.port = parse_or(&lookup, "SLOTBOOK_PORT", config.port)?;
        config.max_connections = parse_or(&lookup, "SLOTBOOK_MAX_CONNECTIONS", config.max_connections)?;
        config.compact_threshold = parse_or(&lookup, "SLOTBOOK_COMPACT_THRESHOLD", config.compact_threshold)?;
        config.compact_interval = Duration::from_secs(parse_or(
            &lookup,
            "SLOTBOOK_COMPACT_INTERVAL_SECS",
            config.compact_interval.as_secs(),
        )?);
        config.lock_timeout = Duration::from_millis(parse_or(
            &lookup,
            "SLOTBOOK_LOCK_TIMEOUT_MS",
            config.lock_timeout.as_millis() as u64,
        )?);
        config.log_level = parse_or(&lookup, "SLOTBOOK_LOG_LEVEL", config.log_level)?;
        config.metrics_port = match lookup("SLOTBOOK_METRICS_PORT") {
            Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError {
                key: "SLOTBOOK_METRICS_PORT",
                value: raw.clone(),
            })?),
            None => None,
        };

        if config.max_connections == 0 {
            return Err(ConfigError { key: "SLOTBOOK_MAX_CONNECTIONS", value: "0".into() });
        }
        if config.lock_timeout.is_zero() {
            return Err(ConfigError { key: "SLOTBOOK_LOCK_TIMEOUT_MS", value: "0".into() });
        }
        if config.compact_interval.is_zero() {
            return Err(ConfigError { key: "SLOTBOOK_COMPACT_INTERVAL_SECS", value: "0".into() });
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError { key, value: raw }),
        None => Ok(default),
    }
}
