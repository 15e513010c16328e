//! Per-day append writers, created at most once per bucket.
//!
//! The cache maps each [`DayBucket`] to a slot. Inserting the slot happens
//! under a synchronous lock, so concurrent first writers for the same day
//! always share one slot. The slot's [`OnceCell`] then lets exactly one of
//! them open the file while the others wait and are woken with the same
//! handle once it is ready. Every caller holds a claim on the slot while it
//! works, taken in the same locked step as the insert, which is what the
//! pending state and the close sweeps observe.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{debug, info, warn};

use crate::error::{Result, SinkError};
use crate::rotation::DayBucket;

/// Age of a bucket's midnight, in hours, after which its writer is closed.
pub const CLOSE_AFTER_HOURS: i64 = 24;

const NO_WRITE: i64 = i64::MIN;

/// Observable state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// No writer has been requested, or its creation failed.
    Absent,
    /// A caller is opening the file.
    Pending,
    /// The writer is open for appends.
    Ready,
    /// The writer was closed and rejects further writes.
    Closed,
}

/// A bucket whose writer was closed by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedWriter {
    pub bucket: DayBucket,
    pub bucket_date: NaiveDate,
    /// Flush or sync failure hit while closing. The writer is closed anyway.
    pub error: Option<String>,
}

/// Append handle for one day's log file.
#[derive(Debug)]
pub struct DailyWriter {
    bucket: DayBucket,
    path: PathBuf,
    file: AsyncMutex<Option<File>>,
    closed: AtomicBool,
    last_write_ms: AtomicI64,
}

impl DailyWriter {
    /// Open the bucket's file: append if it exists, create otherwise.
    async fn open(bucket: DayBucket, path: PathBuf) -> Result<Self> {
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SinkError::fs(&path, e))?;

        let file = if exists {
            OpenOptions::new().append(true).open(&path).await
        } else {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .await
        }
        .map_err(|e| SinkError::fs(&path, e))?;

        debug!(path = %path.display(), append = exists, "Opened daily log writer");

        Ok(Self {
            bucket,
            path,
            file: AsyncMutex::new(Some(file)),
            closed: AtomicBool::new(false),
            last_write_ms: AtomicI64::new(NO_WRITE),
        })
    }

    /// Bucket this writer belongs to.
    pub fn bucket(&self) -> &DayBucket {
        &self.bucket
    }

    /// Path of the daily log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Event time of the most recent successful write.
    pub fn last_write_time(&self) -> Option<DateTime<Utc>> {
        match self.last_write_ms.load(Ordering::Acquire) {
            NO_WRITE => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Whether the writer has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Append one line and advance the write watermark.
    ///
    /// The newline is added here. Lines from concurrent callers never
    /// interleave, but their order is unspecified.
    pub async fn write_line(&self, line: &str, event_time: DateTime<Utc>) -> Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        let mut guard = self.file.lock().await;
        let file = guard
            .as_mut()
            .ok_or_else(|| SinkError::WriterClosed(self.bucket.file_name()))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| SinkError::fs(&self.path, e))?;
        file.flush().await.map_err(|e| SinkError::fs(&self.path, e))?;

        self.last_write_ms
            .store(event_time.timestamp_millis(), Ordering::Release);
        Ok(())
    }

    /// Flush and close the file.
    ///
    /// Returns `false` if the writer was already closed.
    pub async fn close(&self) -> Result<bool> {
        let mut guard = self.file.lock().await;
        let Some(mut file) = guard.take() else {
            return Ok(false);
        };
        self.closed.store(true, Ordering::Release);
        file.flush().await.map_err(|e| SinkError::fs(&self.path, e))?;
        file.sync_all().await.map_err(|e| SinkError::fs(&self.path, e))?;
        debug!(path = %self.path.display(), "Closed daily log writer");
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct Slot {
    writer: OnceCell<Arc<DailyWriter>>,
    /// Callers committed to this slot. Only changed under the map lock.
    pending: AtomicUsize,
}

/// A caller's hold on a slot, released on drop.
///
/// The last claim on a slot whose writer never opened removes the slot, so
/// a failed creation leaves the bucket absent.
struct Claim<'a> {
    cache: &'a WriterCache,
    bucket: &'a DayBucket,
    slot: Arc<Slot>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut slots = self.cache.slots.lock();
        let was = self.slot.pending.fetch_sub(1, Ordering::AcqRel);
        if was == 1
            && self.slot.writer.get().is_none()
            && slots
                .get(self.bucket)
                .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot))
        {
            slots.remove(self.bucket);
        }
    }
}

/// Cache of open daily writers keyed by bucket.
#[derive(Debug)]
pub struct WriterCache {
    dir: PathBuf,
    slots: Mutex<HashMap<DayBucket, Arc<Slot>>>,
}

impl WriterCache {
    /// Create an empty cache writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or join the bucket's slot and mark it pending in one step.
    fn claim<'a>(&'a self, bucket: &'a DayBucket) -> Claim<'a> {
        let mut slots = self.slots.lock();
        let slot = Arc::clone(slots.entry(bucket.clone()).or_default());
        slot.pending.fetch_add(1, Ordering::AcqRel);
        Claim {
            cache: self,
            bucket,
            slot,
        }
    }

    /// Get the writer for a bucket, opening its file on first use.
    ///
    /// Concurrent first calls for the same bucket open the file once and all
    /// resolve to the same handle. If opening fails the error goes to the
    /// caller that attempted it and the entry is dropped, so a later call
    /// retries.
    pub async fn get_writer(&self, bucket: &DayBucket) -> Result<Arc<DailyWriter>> {
        let claim = self.claim(bucket);
        let writer = claim
            .slot
            .writer
            .get_or_try_init(|| async {
                let path = self.dir.join(bucket.file_name());
                DailyWriter::open(bucket.clone(), path).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(writer))
    }

    /// Current state of a bucket's entry.
    pub fn state(&self, bucket: &DayBucket) -> WriterState {
        let slots = self.slots.lock();
        let Some(slot) = slots.get(bucket) else {
            return WriterState::Absent;
        };
        match slot.writer.get() {
            Some(writer) if writer.is_closed() => WriterState::Closed,
            Some(_) => WriterState::Ready,
            None if slot.pending.load(Ordering::Acquire) > 0 => WriterState::Pending,
            None => WriterState::Absent,
        }
    }

    /// Buckets with a cache entry, oldest first.
    pub fn buckets(&self) -> Vec<DayBucket> {
        let mut buckets: Vec<_> = self.slots.lock().keys().cloned().collect();
        buckets.sort();
        buckets
    }

    fn snapshot(&self) -> Vec<(DayBucket, Arc<Slot>)> {
        let mut slots: Vec<_> = self
            .slots
            .lock()
            .iter()
            .map(|(bucket, slot)| (bucket.clone(), Arc::clone(slot)))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        slots
    }

    /// Close writers whose bucket midnight is more than 24 hours before now.
    pub async fn check_close_old_writers(&self) -> Result<Vec<ClosedWriter>> {
        self.check_close_old_writers_at(Utc::now()).await
    }

    /// Close writers whose bucket midnight is more than 24 hours before `now`.
    ///
    /// A writer still being opened is waited for and then closed. Writers
    /// that were already closed are not reported again; entries stay in the
    /// cache in the closed state. A writer whose final flush fails is still
    /// closed and reported, with the failure in [`ClosedWriter::error`].
    pub async fn check_close_old_writers_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClosedWriter>> {
        let max_age = Duration::hours(CLOSE_AFTER_HOURS);
        Ok(self
            .close_where(|bucket| now - bucket.midnight() > max_age)
            .await)
    }

    /// Close writers whose bucket midnight is at or before `cutoff`.
    pub async fn close_through(&self, cutoff: DateTime<Utc>) -> Vec<ClosedWriter> {
        self.close_where(|bucket| bucket.midnight() <= cutoff).await
    }

    async fn close_where(&self, expired: impl Fn(&DayBucket) -> bool) -> Vec<ClosedWriter> {
        let mut closed = Vec::new();

        for (bucket, slot) in self.snapshot() {
            if !expired(&bucket) {
                continue;
            }

            let writer = match slot.writer.get() {
                Some(writer) => Arc::clone(writer),
                None if slot.pending.load(Ordering::Acquire) > 0 => {
                    match self.get_writer(&bucket).await {
                        Ok(writer) => writer,
                        Err(e) => {
                            debug!(bucket = %bucket, error = %e, "Pending writer failed to open");
                            continue;
                        }
                    }
                }
                None => continue,
            };

            let error = match writer.close().await {
                Ok(false) => continue,
                Ok(true) => None,
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "Failed to flush daily log writer on close");
                    Some(e.to_string())
                }
            };
            info!(bucket = %bucket, "Closed old daily log writer");
            closed.push(ClosedWriter {
                bucket_date: bucket.date(),
                bucket,
                error,
            });
        }

        closed
    }

    /// Close every open writer.
    ///
    /// Every writer is closed even if some fail to flush; the first failure
    /// is returned afterwards.
    pub async fn close_all(&self) -> Result<Vec<DayBucket>> {
        let mut closed = Vec::new();
        let mut first_error = None;
        for (bucket, slot) in self.snapshot() {
            let Some(writer) = slot.writer.get() else {
                continue;
            };
            match writer.close().await {
                Ok(true) => closed.push(bucket),
                Ok(false) => {}
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "Failed to flush daily log writer on close");
                    first_error.get_or_insert(e);
                }
            }
        }
        if !closed.is_empty() {
            info!(count = closed.len(), "Closed all daily log writers");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }
}
