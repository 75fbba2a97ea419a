//! Dispatcher configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When a fail-fast dispatch reports its failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailFastMode {
    /// Resolve with the first failure observed. Stragglers keep running and
    /// are drained in the background.
    #[default]
    Early,

    /// Wait for every task, then report the lowest-index failure.
    AfterAll,
}

/// Settings shared by every call made through one `Dispatcher`.
///
/// Missing fields in a config file fall back to the defaults:
/// `separator = " "`, `fail_fast = "early"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Joins segments for the string-shaped aggregates.
    pub separator: String,

    pub fail_fast: FailFastMode,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            separator: " ".to_string(),
            fail_fast: FailFastMode::default(),
        }
    }
}

impl DispatchConfig {
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_fail_fast(mut self, mode: FailFastMode) -> Self {
        self.fail_fast = mode;
        self
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}
