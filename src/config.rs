//! Configuration management for the sync core.
//!
//! This module handles loading and saving configuration to/from a JSON
//! file. The config directory can be customized.
//!
//! Sections:
//! - database_file: path of the local store
//! - remote: where the remote document store lives and how long to wait for it
//! - sync: queue drain behaviour (auto drain, retry and backoff)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NoteError, NoteResult};
use crate::sync_engine::SyncSettings;

/// Remote store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the document store API (None = not configured)
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Drain the pending queue automatically when connectivity returns
    #[serde(default = "default_auto_drain")]
    pub auto_drain: bool,
    /// Attempts per queued change within one drain pass
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_auto_drain() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_drain: default_auto_drain(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigData {
    /// Path to the local store file
    #[serde(default)]
    pub database_file: String,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Title given to newly created notes
    #[serde(default)]
    pub default_note_title: String,
}

/// Configuration manager
pub struct Config {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl Config {
    /// Create a new configuration manager
    ///
    /// Without the `desktop` feature, `config_dir` is required.
    pub fn new(config_dir: Option<PathBuf>) -> NoteResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => {
                #[cfg(feature = "desktop")]
                {
                    dirs::config_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join("notesync")
                }
                #[cfg(not(feature = "desktop"))]
                {
                    return Err(NoteError::Config(
                        "config_dir is required on this platform".to_string(),
                    ));
                }
            }
        };

        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let defaults = || {
            let mut default = ConfigData::default();
            default.database_file = config_dir.join("notes.db").to_string_lossy().to_string();
            default
        };

        let data = if config_file.exists() {
            match fs::read_to_string(&config_file) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    tracing::warn!("Ignoring unreadable config {}: {}", config_file.display(), e);
                    defaults()
                }),
                Err(_) => defaults(),
            }
        } else {
            defaults()
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };

        // Save default config if it doesn't exist
        if !config.config_file.exists() {
            config.save()?;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> NoteResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the local store file path
    pub fn database_file(&self) -> &str {
        &self.data.database_file
    }

    pub fn remote_base_url(&self) -> Option<&str> {
        self.data.remote.base_url.as_deref()
    }

    pub fn set_remote_base_url(&mut self, url: &str) -> NoteResult<()> {
        self.data.remote.base_url = Some(url.to_string());
        self.save()
    }

    /// Upper bound for a single remote call
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.data.remote.request_timeout_secs)
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.data.sync
    }

    pub fn is_auto_drain_enabled(&self) -> bool {
        self.data.sync.auto_drain
    }

    pub fn set_auto_drain(&mut self, enabled: bool) -> NoteResult<()> {
        self.data.sync.auto_drain = enabled;
        self.save()
    }

    pub fn default_note_title(&self) -> &str {
        &self.data.default_note_title
    }

    /// Engine settings derived from this configuration
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            request_timeout: self.request_timeout(),
            max_attempts: self.data.sync.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.data.sync.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.data.sync.max_backoff_ms),
            default_note_title: self.data.default_note_title.clone(),
            auto_drain: self.data.sync.auto_drain,
        }
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "database_file" => Some(self.data.database_file.clone()),
            "remote.base_url" => self.data.remote.base_url.clone(),
            "remote.request_timeout_secs" => Some(self.data.remote.request_timeout_secs.to_string()),
            "sync.auto_drain" => Some(self.data.sync.auto_drain.to_string()),
            "sync.max_attempts" => Some(self.data.sync.max_attempts.to_string()),
            "sync.initial_backoff_ms" => Some(self.data.sync.initial_backoff_ms.to_string()),
            "sync.max_backoff_ms" => Some(self.data.sync.max_backoff_ms.to_string()),
            "default_note_title" => Some(self.data.default_note_title.clone()),
            _ => None,
        }
    }

    /// Set a configuration value
    pub fn set(&mut self, key: &str, value: &str) -> NoteResult<()> {
        match key {
            "database_file" => self.data.database_file = value.to_string(),
            "remote.base_url" => self.data.remote.base_url = Some(value.to_string()),
            "remote.request_timeout_secs" => {
                self.data.remote.request_timeout_secs = parse_value(key, value)?
            }
            "sync.auto_drain" => self.data.sync.auto_drain = parse_value(key, value)?,
            "sync.max_attempts" => self.data.sync.max_attempts = parse_value(key, value)?,
            "sync.initial_backoff_ms" => {
                self.data.sync.initial_backoff_ms = parse_value(key, value)?
            }
            "sync.max_backoff_ms" => self.data.sync.max_backoff_ms = parse_value(key, value)?,
            "default_note_title" => self.data.default_note_title = value.to_string(),
            _ => return Err(NoteError::Config(format!("Unknown config key: {}", key))),
        }
        self.save()
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> NoteResult<T> {
    value
        .parse()
        .map_err(|_| NoteError::Config(format!("Invalid value for {}: {}", key, value)))
}
