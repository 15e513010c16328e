//! Cortex Log Sink - daily-rotating JSONL logs with archiving and retention.
//!
//! Records are appended to one file per UTC day, chosen by each record's own
//! event time, so late or replayed records land in the day they belong to.
//!
//! ```text
//! logs/
//! ├── 2024-02-09.log                     # closed day, archived
//! ├── 2024-02-10.log                     # live writer
//! └── archive.2024-02-09.log.tar.gz      # single entry: 2024-02-09.log
//! ```
//!
//! # Features
//!
//! - One writer per day, opened at most once even under concurrent first writes
//! - Append on restart: an existing daily file is never truncated
//! - Streaming `.tar.gz` archiving of a finished day
//! - Retention sweep that tolerates per-file failures
//!
//! # Usage
//!
//! ```rust,no_run
//! use cortex_log_sink::{DailyLogSink, LogRecord, SinkConfig};
//!
//! #[tokio::main]
//! async fn main() -> cortex_log_sink::Result<()> {
//!     let sink = DailyLogSink::open(SinkConfig::new().days_to_keep(14)).await?;
//!
//!     sink.push(LogRecord::new("2024-01-10T23:30:00-02:00").field("msg", "hello"))
//!         .await?;
//!
//!     // Periodic maintenance, scheduled by the caller.
//!     for closed in sink.check_close_old_writers().await? {
//!         sink.compress_daily_logs(closed.bucket_date).await?;
//!     }
//!     let report = sink.trim_old_logs().await?;
//!     println!("trimmed {} file(s)", report.trimmed.len());
//!
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod record;
pub mod retention;
pub mod rotation;
pub mod sink;
pub mod writer_cache;

// Re-export main types at crate root
pub use archive::{DailyArchive, compress_daily_logs, compress_file, default_archive_path};
pub use config::{MissingTimePolicy, SinkConfig};
pub use error::{FailLoud, PipelineStage, Result, SinkError};
pub use record::LogRecord;
pub use retention::{TrimReport, embedded_date, trim_old_logs};
pub use rotation::{DayBucket, bucket_for, bucket_for_instant, parse_event_time, parse_timestamp};
pub use sink::DailyLogSink;
pub use writer_cache::{ClosedWriter, DailyWriter, WriterCache, WriterState};
