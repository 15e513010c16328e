//! The daily log sink: routing, archiving and retention over one directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use crate::archive::{self, DailyArchive};
use crate::config::{MissingTimePolicy, SinkConfig};
use crate::error::{Result, SinkError};
use crate::record::LogRecord;
use crate::retention::{self, TrimReport};
use crate::rotation::{DayBucket, bucket_for_instant};
use crate::writer_cache::{ClosedWriter, DailyWriter, WriterCache, WriterState};

/// Daily-rotating JSONL sink.
///
/// Records go to `<dir>/<YYYY-MM-DD>.<ext>` according to their own event
/// time. Closing old writers, archiving a finished day and trimming expired
/// files are left to the caller to schedule.
#[derive(Debug)]
pub struct DailyLogSink {
    config: SinkConfig,
    dir: PathBuf,
    writers: WriterCache,
}

impl DailyLogSink {
    /// Validate `config`, create the log directory and return the sink.
    pub async fn open(config: SinkConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.resolved_path()?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SinkError::fs(&dir, e))?;

        info!(
            dir = %dir.display(),
            days_to_keep = config.days_to_keep,
            "Daily log sink opened"
        );

        Ok(Self {
            writers: WriterCache::new(&dir),
            config,
            dir,
        })
    }

    /// Log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Active configuration.
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Bucket a record belongs to, applying the missing-time policy.
    ///
    /// Under [`MissingTimePolicy::IngestionTime`] an untimed record is
    /// stamped with the current time.
    fn route(&self, record: &mut LogRecord) -> Result<(DayBucket, DateTime<Utc>)> {
        let at = match record.event_time() {
            Some(parsed) => parsed?,
            None => match self.config.missing_time {
                MissingTimePolicy::Reject => return Err(SinkError::MissingTimestamp),
                MissingTimePolicy::IngestionTime => {
                    let now = Utc::now();
                    record.stamp(now);
                    now
                }
            },
        };
        Ok((bucket_for_instant(at, &self.config.extension), at))
    }

    /// Append a record to the log of the day its event time falls on.
    pub async fn push(&self, mut record: LogRecord) -> Result<()> {
        let (bucket, at) = self.route(&mut record)?;
        let line = record.to_json_line()?;

        let writer = self.writers.get_writer(&bucket).await?;
        writer.write_line(&line, at).await?;
        debug!(bucket = %bucket, "Appended log record");
        Ok(())
    }

    /// Writer for a bucket, opened on first use.
    pub async fn get_writer(&self, bucket: &DayBucket) -> Result<Arc<DailyWriter>> {
        self.writers.get_writer(bucket).await
    }

    /// State of a bucket's writer.
    pub fn writer_state(&self, bucket: &DayBucket) -> WriterState {
        self.writers.state(bucket)
    }

    /// Buckets with a writer entry, oldest first.
    pub fn buckets(&self) -> Vec<DayBucket> {
        self.writers.buckets()
    }

    /// Close writers whose day ended more than 24 hours ago.
    pub async fn check_close_old_writers(&self) -> Result<Vec<ClosedWriter>> {
        self.writers.check_close_old_writers().await
    }

    /// Like [`Self::check_close_old_writers`] with an explicit current time.
    pub async fn check_close_old_writers_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClosedWriter>> {
        self.writers.check_close_old_writers_at(now).await
    }

    /// Close every open writer, e.g. on shutdown.
    pub async fn close_all(&self) -> Result<Vec<DayBucket>> {
        self.writers.close_all().await
    }

    /// Compress any file into a single-entry `.tar.gz`.
    pub async fn compress_file(&self, in_file: &Path, out_file: Option<&Path>) -> Result<PathBuf> {
        archive::compress_file(in_file, out_file).await
    }

    /// Archive the log of `date` as `archive.<date>.<ext>.tar.gz`.
    pub async fn compress_daily_logs(&self, date: NaiveDate) -> Result<DailyArchive> {
        archive::compress_daily_logs(&self.dir, date, &self.config.extension).await
    }

    /// Delete logs and archives older than the retention window.
    pub async fn trim_old_logs(&self) -> Result<TrimReport> {
        self.trim_old_logs_at(Utc::now()).await
    }

    /// Like [`Self::trim_old_logs`] with an explicit current time.
    ///
    /// Writers for days about to be deleted are closed first, so a late
    /// record for such a day fails with [`SinkError::WriterClosed`].
    pub async fn trim_old_logs_at(&self, now: DateTime<Utc>) -> Result<TrimReport> {
        let retention = self.config.retention();
        for expired in self.writers.close_through(now - retention).await {
            debug!(bucket = %expired.bucket, "Closed writer ahead of retention sweep");
        }
        retention::trim_old_logs(&self.dir, retention, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_sink(temp: &TempDir, policy: MissingTimePolicy) -> DailyLogSink {
        let config = SinkConfig::new()
            .path(temp.path().join("logs"))
            .missing_time(policy);
        DailyLogSink::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_nested_dir() {
        let temp = TempDir::new().unwrap();
        let config = SinkConfig::new().path(temp.path().join("a/b/c"));
        let sink = DailyLogSink::open(config.clone()).await.unwrap();
        assert!(sink.dir().is_dir());
        assert_eq!(sink.config().path, config.path);
        assert_eq!(sink.config().days_to_keep, 30);

        // Existing directory is fine.
        DailyLogSink::open(config).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let temp = TempDir::new().unwrap();
        let config = SinkConfig::new().path(temp.path()).days_to_keep(0);
        assert!(matches!(
            DailyLogSink::open(config).await,
            Err(SinkError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_untimed_record_rejected() {
        let temp = TempDir::new().unwrap();
        let sink = open_sink(&temp, MissingTimePolicy::Reject).await;

        let err = sink.push(LogRecord::untimed().field("msg", "x")).await.unwrap_err();
        assert!(matches!(err, SinkError::MissingTimestamp));
        assert!(sink.buckets().is_empty());
    }

    #[tokio::test]
    async fn test_untimed_record_stamped_with_ingestion_time() {
        let temp = TempDir::new().unwrap();
        let sink = open_sink(&temp, MissingTimePolicy::IngestionTime).await;

        let before = Utc::now();
        sink.push(LogRecord::untimed().field("msg", "x")).await.unwrap();
        let after = Utc::now();

        let buckets = sink.buckets();
        assert_eq!(buckets.len(), 1);
        let day = buckets[0].date();
        assert!(day == before.date_naive() || day == after.date_naive());

        let content = std::fs::read_to_string(sink.dir().join(buckets[0].file_name())).unwrap();
        let line: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert!(line["time"].is_string());
        assert_eq!(line["msg"], "x");
    }

    #[tokio::test]
    async fn test_invalid_timestamp_fails_push() {
        let temp = TempDir::new().unwrap();
        let sink = open_sink(&temp, MissingTimePolicy::IngestionTime).await;

        let err = sink.push(LogRecord::new("not a time")).await.unwrap_err();
        assert!(matches!(err, SinkError::InvalidTimestamp { .. }));
    }
}
