//! Log sink configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SinkError};

// ============================================================================
// Constants
// ============================================================================

/// Default log directory, relative to the working directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default retention period in days.
pub const DEFAULT_DAYS_TO_KEEP: u32 = 30;

/// Default extension of daily log files.
pub const DEFAULT_EXTENSION: &str = "log";

/// Suffix appended to archived log files.
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Prefix of daily archive file names.
pub const ARCHIVE_PREFIX: &str = "archive.";

// ============================================================================
// Configuration
// ============================================================================

/// What to do with a record that carries no `time` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTimePolicy {
    /// Fail the push with [`SinkError::MissingTimestamp`].
    #[default]
    Reject,
    /// Stamp the record with the ingestion time and route it to that day.
    IngestionTime,
}

/// Configuration for the daily log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Directory holding daily logs and archives.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Retention period in days. Must be positive.
    #[serde(default = "default_days_to_keep")]
    pub days_to_keep: u32,

    /// Extension of daily log files (without the leading dot).
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Handling of records without a timestamp.
    #[serde(default)]
    pub missing_time: MissingTimePolicy,
}

fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

fn default_days_to_keep() -> u32 {
    DEFAULT_DAYS_TO_KEEP
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            days_to_keep: DEFAULT_DAYS_TO_KEEP,
            extension: default_extension(),
            missing_time: MissingTimePolicy::default(),
        }
    }
}

impl SinkConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SinkError::fs(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Check value constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.days_to_keep == 0 {
            return Err(SinkError::Config(
                "days_to_keep must be a positive integer".to_string(),
            ));
        }
        if self.extension.is_empty() || self.extension.contains(['.', '/', '\\']) {
            return Err(SinkError::Config(format!(
                "extension must be a bare file extension, got {:?}",
                self.extension
            )));
        }
        Ok(())
    }

    /// Log directory resolved against the current working directory.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        if self.path.is_absolute() {
            return Ok(self.path.clone());
        }
        let cwd = std::env::current_dir().map_err(|e| SinkError::fs(".", e))?;
        Ok(cwd.join(&self.path))
    }

    /// Retention window as a chrono duration.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.days_to_keep))
    }

    /// Builder: set log directory.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Builder: set retention in days.
    pub fn days_to_keep(mut self, days: u32) -> Self {
        self.days_to_keep = days;
        self
    }

    /// Builder: set file extension.
    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = ext.into();
        self
    }

    /// Builder: set missing-timestamp policy.
    pub fn missing_time(mut self, policy: MissingTimePolicy) -> Self {
        self.missing_time = policy;
        self
    }
}
