//! Server configuration
//!
//! Loaded from an optional JSON file, then overridden from the environment.
//! Every field has a default so an empty `{}` file is a valid configuration.

use crate::permission::{DirectoryConfig, Permission};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_BIND_ADDR: &str = "CHUNKSHARE_BIND_ADDR";
pub const ENV_STORAGE_ROOT: &str = "CHUNKSHARE_STORAGE_ROOT";
pub const ENV_DATABASE_URL: &str = "CHUNKSHARE_DATABASE_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub storage: StorageConfig,
    pub directories: Vec<DirectoryConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: "sqlite://chunkshare.db".to_string(),
            storage: StorageConfig::default(),
            directories: vec![
                DirectoryConfig::new("public", &[Permission::Read, Permission::Write]),
                DirectoryConfig::new("shared", &[Permission::Read, Permission::Write, Permission::Delete]),
                DirectoryConfig::new("archive", &[Permission::Read]),
            ],
        }
    }
}

/// Limits and lifetimes for stored files and upload sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    /// Largest body accepted by the single-shot upload route.
    pub max_file_size: u64,
    /// Largest declared size accepted by chunked init.
    pub max_chunked_file_size: u64,
    /// Largest chunk size a client may declare.
    pub max_chunk_size: u64,
    /// Most chunks one upload may be split into. Bounds the per-session
    /// index set, so tiny chunk sizes on huge files are refused.
    pub max_chunks_per_upload: u32,
    pub session_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    /// How long completed/cancelled session rows are kept before deletion.
    pub terminal_retention_secs: u64,
    pub max_open_sessions: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./uploads"),
            max_file_size: 100 * 1024 * 1024,
            max_chunked_file_size: 50 * 1024 * 1024 * 1024,
            max_chunk_size: 64 * 1024 * 1024,
            max_chunks_per_upload: 100_000,
            session_ttl_secs: 48 * 3600,
            cleanup_interval_secs: 3600,
            terminal_retention_secs: 7 * 24 * 3600,
            max_open_sessions: 64,
        }
    }
}

impl StorageConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn terminal_retention(&self) -> Duration {
        Duration::from_secs(self.terminal_retention_secs)
    }

    /// Request body limit for the HTTP layer: a whole small file or one chunk,
    /// plus room for multipart framing.
    pub fn max_request_bytes(&self) -> usize {
        let largest = std::cmp::max(self.max_file_size, self.max_chunk_size);
        usize::try_from(largest).unwrap_or(usize::MAX).saturating_add(64 * 1024)
    }
}

impl ServerConfig {
    /// Read `path` if given (a missing file falls back to defaults), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Environment lookups are injected so overrides can be tested without
    /// touching the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_BIND_ADDR) {
            self.bind_addr = value.parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_BIND_ADDR,
                value,
            })?;
        }
        if let Some(value) = lookup(ENV_STORAGE_ROOT) {
            self.storage.root = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_DATABASE_URL) {
            self.database_url = value;
        }
        Ok(())
    }
}
