//! Persisted settings: the OpenAI API key and the request timeout.
//!
//! The settings live in a user-local YAML file and are created lazily with
//! default values on first access. Every mutation goes through `save`, which
//! persists immediately.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_TIMEOUT_SECONDS: i64 = 10;

const SETTINGS_FILE_NAME: &str = "settings.yaml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
    #[error("failed to access the settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: String,

    /// Request deadline in seconds. Values below 1 are reset to the default.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: i64,
}

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&Self::config_path()?)
    }

    fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let mut settings: Self = serde_yaml::from_str(&raw)?;
        settings.clamp_timeout();
        Ok(settings)
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::config_path()?)
    }

    fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Soft clamp: a non-positive timeout is replaced with the default rather
    /// than rejected. Returns whether the value was reset.
    pub fn clamp_timeout(&mut self) -> bool {
        if self.timeout_seconds < 1 {
            warn!(
                value = self.timeout_seconds,
                "timeout must be greater than 0, using the default of 10 seconds"
            );
            self.timeout_seconds = DEFAULT_TIMEOUT_SECONDS;
            true
        } else {
            false
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1) as u64)
    }

    pub fn api_key_set(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn config_path() -> Result<PathBuf, SettingsError> {
        Self::config_path_with_env(|key| std::env::var_os(key))
    }

    /// Path resolution with a custom env lookup (for testing).
    fn config_path_with_env<F>(env_fn: F) -> Result<PathBuf, SettingsError>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let dir = env_fn("AICMD_CONFIG_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|base| base.join("aicmd")))
            .ok_or(SettingsError::NoConfigDir)?;
        Ok(dir.join(SETTINGS_FILE_NAME))
    }
}
