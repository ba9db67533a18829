use super::types::*;
use crate::error_handling::types::ConfigError;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Application configuration.
///
/// Loaded from a TOML file with three optional tables. Any missing table or
/// key falls back to its default, so an empty file is a valid configuration.
///
/// ```toml
/// [capture]
/// path = "/var/log/warden"
/// mode = 0o640
/// per_session = true
///
/// [relay]
/// copy_buffer_size = 32768
/// event_queue_depth = 64
/// max_sessions = 16
///
/// [replay]
/// speed = 2.0
/// max_idle_secs = 1.5
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub relay: RelayConfig,
    pub replay: ReplayConfig,
}

impl Config {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let raw = fs::read_to_string(path).map_err(|e| {
            error!("Unable to read {}: {}", path.display(), e);
            ConfigError::IoError(e)
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.mode > 0o777 {
            return Err(ConfigError::InvalidValue(format!(
                "capture.mode {:o} is not a permission mode",
                self.capture.mode
            )));
        }
        if self.capture.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "capture.path must not be empty".to_string(),
            ));
        }
        if self.relay.copy_buffer_size == 0 {
            return Err(ConfigError::InvalidValue(
                "relay.copy_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.relay.event_queue_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "relay.event_queue_depth must be greater than zero".to_string(),
            ));
        }
        self.replay.validate()
    }
}
