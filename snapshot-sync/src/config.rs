//! Configuration management for the sync engine.
//!
//! Loaded once at startup. JSON files follow the add-on `options.json` layout,
//! anything else is read as TOML. Every failure here is fatal to the caller.

use crate::retry::RetryPolicy;
use crate::utils::{Result, SyncError};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable carrying the snapshot host token when the config omits it
pub const SNAPSHOT_TOKEN_ENV: &str = "HASSIO_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Dropbox OAuth access token
    pub oauth_access_token: String,

    /// Remote folder the archives are synchronized into
    pub remote_path: String,

    /// Snapshots kept on the local snapshot host
    #[serde(deserialize_with = "deserialize_count")]
    pub number_to_keep_local: usize,

    /// Archives kept in the remote folder
    #[serde(deserialize_with = "deserialize_count")]
    pub number_to_keep_remote: usize,

    /// Flat directory holding the local archives
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    #[serde(default)]
    pub snapshot_host: SnapshotHostConfig,

    #[serde(default)]
    pub dropbox: DropboxConfig,

    /// Upload chunk size in bytes (default: 4 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHostConfig {
    /// Base URL of the snapshot host API
    #[serde(default = "default_snapshot_url")]
    pub url: String,

    /// Static API token, falls back to `HASSIO_TOKEN`
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropboxConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_content_url")]
    pub content_url: String,
}

// Default values
fn default_backup_dir() -> PathBuf {
    PathBuf::from("/backup")
}

fn default_chunk_size() -> usize {
    4 * 1024 * 1024 // 4 MiB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_snapshot_url() -> String {
    "http://hassio".to_string()
}

fn default_api_url() -> String {
    "https://api.dropboxapi.com/2".to_string()
}

fn default_content_url() -> String {
    "https://content.dropboxapi.com/2".to_string()
}

impl Default for SnapshotHostConfig {
    fn default() -> Self {
        Self {
            url: default_snapshot_url(),
            token: None,
        }
    }
}

impl SnapshotHostConfig {
    /// Token from the config file, or from the environment when absent
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(SNAPSHOT_TOKEN_ENV).ok())
    }
}

impl Default for DropboxConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            content_url: default_content_url(),
        }
    }
}

/// Retention counts may arrive as numbers or numeric strings.
fn deserialize_count<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Int(i64),
        Str(String),
    }

    let value = match Count::deserialize(deserializer)? {
        Count::Int(n) => n,
        Count::Str(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| serde::de::Error::custom(format!("`{}` is not a whole number", s)))?,
    };

    usize::try_from(value)
        .map_err(|_| serde::de::Error::custom(format!("retention count must not be negative, got {}", value)))
}

impl Config {
    /// Load configuration from a JSON or TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| SyncError::Config(format!("invalid options: {}", e)))?;
        config.sanitize()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| SyncError::Config(format!("invalid options: {}", e)))?;
        config.sanitize()
    }

    fn sanitize(mut self) -> Result<Self> {
        if self.oauth_access_token.trim().is_empty() {
            return Err(SyncError::Config("oauth_access_token is empty".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(SyncError::Config("chunk_size must be greater than zero".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config("retry.max_attempts must be at least 1".to_string()));
        }

        self.remote_path = self.remote_path.trim_end_matches('/').to_string();
        self.snapshot_host.url = self.snapshot_host.url.trim_end_matches('/').to_string();

        Ok(self)
    }
}
