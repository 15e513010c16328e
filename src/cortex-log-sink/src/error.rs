//! Error types for cortex-log-sink.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Stage of the archive pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Building the tar stream from the source file.
    Pack,
    /// Finishing the gzip stream.
    Compress,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pack => f.write_str("pack"),
            Self::Compress => f.write_str("compress"),
        }
    }
}

/// Log sink error types.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Filesystem operation failed (listing, open, unlink, write, flush).
    #[error("Filesystem error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Archive pipeline failed; the destination is left in an undefined state.
    #[error("Archive {stage} failed for {}: {source}", path.display())]
    Pipeline {
        stage: PipelineStage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record carries a time value that cannot be parsed.
    #[error("Invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    /// Record has no time value and the sink rejects such records.
    #[error("Record has no timestamp")]
    MissingTimestamp,

    /// Bucket name is not `YYYY-MM-DD.<ext>`.
    #[error("Invalid day bucket: {0}")]
    InvalidBucket(String),

    /// Write attempted through a writer that has been closed.
    #[error("Writer for {0} is closed")]
    WriterClosed(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A blocking task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(String),

    /// Retention sweep finished with per-file failures.
    #[error("Failed to trim {} file(s)", failed.len())]
    Trim { failed: BTreeMap<String, String> },
}

impl SinkError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn pipeline(
        stage: PipelineStage,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Pipeline {
            stage,
            path: path.into(),
            source,
        }
    }
}

/// Result type for log sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Crash-on-error escape hatch for callers that have no recovery path.
///
/// Every sink operation returns a [`Result`]. Callers that want a failed
/// write, archive or sweep to take the process down call `fail_loud()`
/// instead of handling the error.
pub trait FailLoud<T> {
    /// Unwrap the value, logging and panicking on error.
    fn fail_loud(self) -> T;
}

impl<T> FailLoud<T> for Result<T> {
    #[track_caller]
    fn fail_loud(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "Unhandled log sink failure");
                panic!("unhandled log sink failure: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SinkError::WriterClosed("2024-01-01.log".to_string());
        assert_eq!(err.to_string(), "Writer for 2024-01-01.log is closed");

        let err = SinkError::pipeline(
            PipelineStage::Compress,
            "/tmp/a.tar.gz",
            std::io::Error::other("boom"),
        );
        assert_eq!(
            err.to_string(),
            "Archive compress failed for /tmp/a.tar.gz: boom"
        );
    }

    #[test]
    fn test_fail_loud_passes_ok_through() {
        let ok: Result<u32> = Ok(7);
        assert_eq!(ok.fail_loud(), 7);
    }

    #[test]
    #[should_panic(expected = "unhandled log sink failure")]
    fn test_fail_loud_panics_on_error() {
        let err: Result<()> = Err(SinkError::MissingTimestamp);
        err.fail_loud();
    }
}
