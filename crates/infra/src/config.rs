//! Configuration loading and representation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lineage_core::ErrorKind;
use lineage_observability::LogFormat;

use crate::event_store::EventStoreError;
use crate::projections::DEFAULT_REPLAY_PAGE_SIZE;
use crate::snapshot::SnapshotError;

pub const ENV_STORAGE: &str = "LINEAGE_STORAGE";
pub const ENV_DATA_DIR: &str = "LINEAGE_DATA_DIR";
pub const ENV_FSYNC: &str = "LINEAGE_FSYNC";
pub const ENV_REPLAY_PAGE_SIZE: &str = "LINEAGE_REPLAY_PAGE_SIZE";
pub const ENV_LOG_LEVEL: &str = "LINEAGE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LINEAGE_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to open event store: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("failed to open snapshot store: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Invalid { .. } => ErrorKind::InvalidInput,
            ConfigError::EventStore(e) => e.kind(),
            ConfigError::Snapshot(e) => e.kind(),
        }
    }

    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Where the event log and snapshot catalog live.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local; everything is lost on exit.
    #[default]
    Memory,
    /// JSON files under `data_dir`.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub storage: StorageBackend,
    pub data_dir: PathBuf,
    /// `fsync` the event log after every append (file backend only).
    pub fsync: bool,
    pub replay_page_size: usize,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            data_dir: PathBuf::from("./data"),
            fsync: true,
            replay_page_size: DEFAULT_REPLAY_PAGE_SIZE,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl CoreConfig {
    /// In-memory configuration (tests, tooling).
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed configuration rooted at `data_dir`.
    pub fn file(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageBackend::File,
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load from `LINEAGE_*` environment variables; unset ones keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_STORAGE) {
            config.storage = match v.trim().to_ascii_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "file" => StorageBackend::File,
                _ => return Err(ConfigError::invalid(ENV_STORAGE, &v, "expected 'memory' or 'file'")),
            };
        }

        if let Some(v) = lookup(ENV_DATA_DIR) {
            if v.trim().is_empty() {
                return Err(ConfigError::invalid(ENV_DATA_DIR, &v, "must not be blank"));
            }
            config.data_dir = PathBuf::from(v);
        }

        if let Some(v) = lookup(ENV_FSYNC) {
            config.fsync = parse_bool(&v)
                .ok_or_else(|| ConfigError::invalid(ENV_FSYNC, &v, "expected a boolean"))?;
        }

        if let Some(v) = lookup(ENV_REPLAY_PAGE_SIZE) {
            config.replay_page_size = match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::invalid(ENV_REPLAY_PAGE_SIZE, &v, "expected a positive integer")),
            };
        }

        if let Some(v) = lookup(ENV_LOG_LEVEL) {
            if v.trim().is_empty() {
                return Err(ConfigError::invalid(ENV_LOG_LEVEL, &v, "must not be blank"));
            }
            config.log_level = v;
        }

        if let Some(v) = lookup(ENV_LOG_FORMAT) {
            config.log_format = v
                .parse()
                .map_err(|e: lineage_observability::ParseLogFormatError| {
                    ConfigError::invalid(ENV_LOG_FORMAT, &v, e.to_string())
                })?;
        }

        Ok(config)
    }

    /// Install the process-wide tracing subscriber described by this config.
    pub fn init_logging(&self) {
        lineage_observability::init_with(&self.log_level, self.log_format);
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
