//! Retention sweep over the log directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SinkError};
use crate::rotation::DATE_FORMAT;

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    /// Names of deleted files.
    pub trimmed: Vec<String>,
    /// File name to failure message for files that could not be deleted.
    pub errors: BTreeMap<String, String>,
}

impl TrimReport {
    /// Whether every eligible file was removed.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn per-file failures into an error, keeping the trimmed list otherwise.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.trimmed)
        } else {
            Err(SinkError::Trim {
                failed: self.errors,
            })
        }
    }
}

/// Find the first dot-separated component of a file name that is a date.
///
/// `2024-01-01.log` and `archive.2024-01-01.log.tar.gz` both yield
/// 2024-01-01; underscores are accepted as separators too.
pub fn embedded_date(file_name: &str) -> Option<NaiveDate> {
    file_name.split('.').find_map(|part| {
        if part.len() != 10 {
            return None;
        }
        NaiveDate::parse_from_str(&part.replace('_', "-"), DATE_FORMAT).ok()
    })
}

/// Delete each `(name, path)` pair, recording failures per name.
async fn delete_files(files: impl IntoIterator<Item = (String, PathBuf)>) -> TrimReport {
    let mut report = TrimReport::default();
    for (name, path) in files {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(file = %name, "Trimmed old log file");
                report.trimmed.push(name);
            }
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to trim old log file");
                report.errors.insert(name, e.to_string());
            }
        }
    }
    report.trimmed.sort();
    report
}

/// Delete files in `dir` whose embedded date is at or before `now - retention`.
///
/// Files without a date in their name are ignored. A failure to delete one
/// file is recorded in the report and the sweep moves on; only failing to
/// list the directory fails the call.
pub async fn trim_old_logs(
    dir: &Path,
    retention: Duration,
    now: DateTime<Utc>,
) -> Result<TrimReport> {
    let cutoff = now - retention;

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| SinkError::fs(dir, e))?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SinkError::fs(dir, e))?
    {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Some(date) = embedded_date(&name) else {
            continue;
        };

        if date.and_time(NaiveTime::MIN).and_utc() <= cutoff {
            candidates.push((name, entry.path()));
        }
    }

    let report = delete_files(candidates).await;

    if !report.trimmed.is_empty() || !report.errors.is_empty() {
        info!(
            dir = %dir.display(),
            trimmed = report.trimmed.len(),
            failed = report.errors.len(),
            cutoff = %cutoff,
            "Log retention sweep completed"
        );
    }

    Ok(report)
}
