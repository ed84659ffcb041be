//! Configuration file handling for ~/.tripstream/config.ini.
//!
//! Loads and saves user configuration with sensible defaults.
//! Settings structs live in [`super::settings`], constants in [`super::defaults`],
//! parsing in [`super::parser`], and serialization in [`super::writer`].

use chrono::{DateTime, Utc};
use ini::Ini;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::settings::ConfigFile;
use crate::cache::CacheConfig;
use crate::retry::RetryPolicy;
use crate::window::Timeline;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load configuration from the default path (~/.tripstream/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the config file with defaults if it doesn't exist.
    ///
    /// Returns true if the file was created.
    pub fn ensure_exists_at(path: &Path) -> Result<bool, ConfigFileError> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save_to(path)?;
        Ok(true)
    }

    /// Builds the cache configuration.
    ///
    /// `fallback_window_start` is used when the file leaves `window_start`
    /// empty.
    pub fn to_cache_config(
        &self,
        fallback_window_start: Option<DateTime<Utc>>,
    ) -> Result<CacheConfig, ConfigFileError> {
        let window_start = self
            .timeline
            .window_start
            .or(fallback_window_start)
            .ok_or_else(|| ConfigFileError::InvalidValue {
                section: "timeline".to_string(),
                key: "window_start".to_string(),
                value: String::new(),
                reason: "required when the store is empty".to_string(),
            })?;

        let timeline = Timeline::new(
            window_start,
            Duration::from_secs(self.timeline.chunk_size_secs),
            Duration::from_secs(self.timeline.batch_size_secs),
        )
        .map_err(|e| ConfigFileError::InvalidValue {
            section: "timeline".to_string(),
            key: "batch_size_secs".to_string(),
            value: self.timeline.batch_size_secs.to_string(),
            reason: e.to_string(),
        })?;

        let config = CacheConfig::new(timeline)
            .with_fade(Duration::from_secs(self.timeline.fade_secs))
            .with_retry(RetryPolicy::new(
                self.fetch.max_retries,
                Duration::from_millis(self.fetch.retry_delay_ms),
            ))
            .with_prefetch_threshold(self.prefetch.threshold)
            .with_initial_chunks(self.prefetch.initial_chunks)
            .with_retain_behind(self.prefetch.retain_behind)
            .with_unit_ready_timeout(Duration::from_secs(self.unit.ready_timeout_secs))
            .with_unit_channel_capacity(self.unit.channel_capacity);

        config
            .validate()
            .map_err(|e| ConfigFileError::InvalidValue {
                section: "prefetch".to_string(),
                key: "threshold".to_string(),
                value: self.prefetch.threshold.to_string(),
                reason: e.to_string(),
            })?;

        Ok(config)
    }
}

/// Get the path to the config directory (~/.tripstream).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tripstream")
}

/// Get the path to the config file (~/.tripstream/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
