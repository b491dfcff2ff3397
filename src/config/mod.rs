//! Configuration management.
//!
//! Resolves the local database path and the remote sync service settings.
//!
//! # Layout
//!
//! - **Database**: `~/.fieldsync/data/fieldsync.db` unless overridden
//! - **Config file**: `~/.fieldsync/config.json`
//!
//! Every setting resolves with the same priority: explicit value (CLI flag),
//! then environment variable, then config file, then built-in default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::SyncOptions;

/// Default HTTP timeout for remote calls.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// Remote sync service connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the REST endpoint.
    pub url: String,
    /// API key sent as `apikey` and bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_REMOTE_TIMEOUT_SECS
}

/// Partial remote settings as stored in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Sync tunables as stored in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    pub max_retry_count: Option<i64>,
    pub base_backoff_ms: Option<u64>,
}

/// Contents of `~/.fieldsync/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldsyncConfig {
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub sync: Option<SyncConfig>,
}

/// Get the global fieldsync directory (`~/.fieldsync/`).
#[must_use]
pub fn global_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".fieldsync"))
}

/// Get the config file path.
fn config_path() -> Result<PathBuf> {
    global_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or(Error::Config("Could not determine home directory".into()))
}

/// Load the config file, or defaults when it does not exist.
///
/// # Errors
///
/// Returns `Error::Config` if the file exists but cannot be read or parsed.
pub fn load_config() -> Result<FieldsyncConfig> {
    load_config_from(&config_path()?)
}

/// Load a config file from an explicit path.
///
/// # Errors
///
/// Returns `Error::Config` if the file exists but cannot be read or parsed.
pub fn load_config_from(path: &Path) -> Result<FieldsyncConfig> {
    if !path.exists() {
        return Ok(FieldsyncConfig::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
}

/// Resolve the database path.
///
/// Priority:
/// 1. `explicit_path` (the `--db` flag or `FIELDSYNC_DB`)
/// 2. `~/.fieldsync/data/fieldsync.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    global_dir().map(|dir| dir.join("data").join("fieldsync.db"))
}

/// Read a non-empty environment variable.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve remote settings.
///
/// Returns `Ok(None)` when no URL is configured anywhere; the sync engine
/// treats that as "remote unconfigured", not as an error.
///
/// # Errors
///
/// Returns `Error::Config` if the config file is unreadable.
pub fn resolve_remote_settings(
    explicit_url: Option<&str>,
    explicit_key: Option<&str>,
) -> Result<Option<RemoteSettings>> {
    let file = load_config()?.remote.unwrap_or_default();
    Ok(merge_remote_settings(
        explicit_url.map(str::to_string).or_else(|| env_var("FIELDSYNC_REMOTE_URL")),
        explicit_key.map(str::to_string).or_else(|| env_var("FIELDSYNC_REMOTE_KEY")),
        file,
    ))
}

/// Layer explicit/env values over the config file section.
fn merge_remote_settings(
    url: Option<String>,
    api_key: Option<String>,
    file: RemoteConfig,
) -> Option<RemoteSettings> {
    let url = url.or(file.url).filter(|u| !u.trim().is_empty())?;
    Some(RemoteSettings {
        url,
        api_key: api_key.or(file.api_key),
        timeout_secs: file.timeout_secs.unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS),
    })
}

/// Resolve engine tunables from the config file.
///
/// # Errors
///
/// Returns `Error::Config` if the config file is unreadable or a value is
/// out of range.
pub fn resolve_sync_options() -> Result<SyncOptions> {
    sync_options_from(load_config()?.sync.unwrap_or_default())
}

fn sync_options_from(config: SyncConfig) -> Result<SyncOptions> {
    let mut options = SyncOptions::default();
    if let Some(max) = config.max_retry_count {
        if max < 1 {
            return Err(Error::Config(format!(
                "sync.max_retry_count must be at least 1, got {max}"
            )));
        }
        options.max_retry_count = max;
    }
    if let Some(ms) = config.base_backoff_ms {
        options.base_backoff = Duration::from_millis(ms);
    }
    Ok(options)
}
