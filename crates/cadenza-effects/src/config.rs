use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tuning for an effect session's synchronisation machinery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Size of the ring holding changes for parameters the plugin never
    /// declared.
    pub overflow_capacity: usize,
    /// Cadence at which the UI thread is expected to call `on_idle`.
    pub idle_interval_ms: u64,
    /// Clamp out-of-range panel values during validation instead of
    /// rejecting them.
    pub clamp_on_validate: bool,
    /// Log a warning when overflow records are dropped.
    pub log_overflow: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            overflow_capacity: 256,
            idle_interval_ms: 30,
            clamp_on_validate: false,
            log_overflow: true,
        }
    }
}

impl SyncConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms.max(1))
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads the config at `path`, falling back to defaults on any failure.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path)
            .map_err(ConfigError::from)
            .and_then(|text| Self::from_json(&text))
        {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(%err, path = %path.display(), "using default sync config");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
