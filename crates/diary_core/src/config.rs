//! Engine configuration.
//!
//! # Responsibility
//! - Hold tunables for debounce, edit history and logging.
//! - Load them from JSON with per-field defaults.
//!
//! # Invariants
//! - Missing fields take defaults; unknown fields are ignored.
//! - `edit_history_cap` is at least 1 after validation.

use crate::logging::default_log_level;
use crate::model::entry::DEFAULT_EDIT_HISTORY_CAP;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Tunables for the entry engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay before a burst of mutations is written to storage.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum snapshots kept in `Entry::edit_history`.
    #[serde(default = "default_edit_history_cap")]
    pub edit_history_cap: usize,

    #[serde(default = "default_log_level_owned")]
    pub log_level: String,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_edit_history_cap() -> usize {
    DEFAULT_EDIT_HISTORY_CAP
}

fn default_log_level_owned() -> String {
    default_log_level().to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            edit_history_cap: default_edit_history_cap(),
            log_level: default_log_level_owned(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON config file; an absent file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.edit_history_cap == 0 {
            return Err(ConfigError::Invalid(
                "edit_history_cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
