//! Session configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::connection::{
    CONNECTION_TIMEOUT, DEFAULT_ADDRESS, DEFAULT_PORT, MAX_PARTICIPANTS,
};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of "trace", "debug", "info", "warn", "error"
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Address used by `join_default`
    pub default_address: String,

    /// Port used by `host_default` and `join_default`
    pub default_port: u16,

    /// Peers the listening endpoint accepts
    pub max_participants: usize,

    /// Join deadline in seconds
    pub connect_timeout_secs: f32,

    /// Host without occupying a participant slot
    pub dedicated: bool,

    pub logging: LoggingSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_address: DEFAULT_ADDRESS.to_string(),
            default_port: DEFAULT_PORT,
            max_participants: MAX_PARTICIPANTS,
            connect_timeout_secs: CONNECTION_TIMEOUT.as_secs_f32(),
            dedicated: false,
            logging: LoggingSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&contents)?;
        tracing::info!(path = %path.as_ref().display(), "loaded session config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_participants == 0 || self.max_participants > MAX_PARTICIPANTS {
            return Err(ConfigError::Invalid(format!(
                "max_participants must be between 1 and {}, got {}",
                MAX_PARTICIPANTS, self.max_participants
            )));
        }
        if self.connect_timeout_secs <= 0.0
            || Duration::try_from_secs_f32(self.connect_timeout_secs).is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "connect_timeout_secs must be a positive duration, got {}",
                self.connect_timeout_secs
            )));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown logging level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Join deadline. Falls back to `CONNECTION_TIMEOUT` for unrepresentable values.
    pub fn connect_timeout(&self) -> Duration {
        match Duration::try_from_secs_f32(self.connect_timeout_secs) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => CONNECTION_TIMEOUT,
        }
    }
}
