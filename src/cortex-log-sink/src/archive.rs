//! Compression of daily logs into single-entry `.tar.gz` archives.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{info, warn};

use crate::config::ARCHIVE_SUFFIX;
use crate::error::{PipelineStage, Result, SinkError};
use crate::rotation::DayBucket;

/// Paths involved in archiving one day's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyArchive {
    /// Source log file. Left in place.
    pub log_file: PathBuf,
    /// Archive written next to it.
    pub archive_file: PathBuf,
}

/// Default archive path for a source file: the source path plus `.tar.gz`.
pub fn default_archive_path(in_file: &Path) -> PathBuf {
    let mut name = in_file.as_os_str().to_owned();
    name.push(ARCHIVE_SUFFIX);
    PathBuf::from(name)
}

/// Compress `in_file` into a gzip-compressed tar holding a single entry named
/// after the file's base name.
///
/// An existing destination is removed first. Returns once the archive has
/// been fully written and synced. On failure the destination may be left
/// partially written; removing it is up to the caller.
pub async fn compress_file(in_file: &Path, out_file: Option<&Path>) -> Result<PathBuf> {
    let in_file = in_file.to_path_buf();
    let out_file = out_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_archive_path(&in_file));

    if tokio::fs::try_exists(&out_file).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(&out_file).await {
            warn!(
                path = %out_file.display(),
                error = %e,
                "Failed to remove existing archive"
            );
        }
    }

    let dest = out_file.clone();
    let src = in_file.clone();
    tokio::task::spawn_blocking(move || write_archive(&src, &dest))
        .await
        .map_err(|e| SinkError::Task(format!("Join error: {}", e)))??;

    info!(
        source = %in_file.display(),
        archive = %out_file.display(),
        "Compressed log file"
    );
    Ok(out_file)
}

/// Archive the daily log for `date` in `dir` as `archive.<date>.<ext>.tar.gz`.
///
/// The source log is not deleted; the retention sweep takes care of it.
pub async fn compress_daily_logs(
    dir: &Path,
    date: NaiveDate,
    extension: &str,
) -> Result<DailyArchive> {
    let bucket = DayBucket::new(date, extension);
    let log_file = dir.join(bucket.file_name());
    let archive_file = dir.join(bucket.archive_name());

    compress_file(&log_file, Some(&archive_file)).await?;

    Ok(DailyArchive {
        log_file,
        archive_file,
    })
}

fn write_archive(src: &Path, dest: &Path) -> Result<()> {
    let entry_name = src.file_name().ok_or_else(|| {
        SinkError::pipeline(
            PipelineStage::Pack,
            src,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "source has no file name"),
        )
    })?;

    let dest_file = File::create(dest).map_err(|e| SinkError::fs(dest, e))?;
    let encoder = GzEncoder::new(BufWriter::new(dest_file), Compression::default());
    let mut packer = tar::Builder::new(encoder);

    let mut source =
        File::open(src).map_err(|e| SinkError::pipeline(PipelineStage::Pack, src, e))?;
    packer
        .append_file(entry_name, &mut source)
        .map_err(|e| SinkError::pipeline(PipelineStage::Pack, src, e))?;

    // Writes the tar trailer; the gzip stream is finished after it.
    let encoder = packer
        .into_inner()
        .map_err(|e| SinkError::pipeline(PipelineStage::Pack, src, e))?;
    let writer = encoder
        .finish()
        .map_err(|e| SinkError::pipeline(PipelineStage::Compress, dest, e))?;

    let file = writer
        .into_inner()
        .map_err(|e| SinkError::fs(dest, e.into_error()))?;
    file.sync_all().map_err(|e| SinkError::fs(dest, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_entries(archive: &Path) -> Vec<(String, Vec<u8>)> {
        let file = File::open(archive).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().to_string();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (name, data)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_entry_round_trip() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("2024-01-11.log");
        let content: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        std::fs::write(&src, &content).unwrap();

        let archive = compress_file(&src, None).await.unwrap();
        assert_eq!(archive, temp.path().join("2024-01-11.log.tar.gz"));

        let entries = read_entries(&archive);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "2024-01-11.log");
        assert_eq!(entries[0].1, content);
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_existing_destination_is_replaced() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("2024-01-11.log");
        let dest = temp.path().join("out.tar.gz");
        std::fs::write(&src, b"fresh\n").unwrap();
        std::fs::write(&dest, b"not an archive").unwrap();

        compress_file(&src, Some(&dest)).await.unwrap();

        let entries = read_entries(&dest);
        assert_eq!(entries, vec![("2024-01-11.log".to_string(), b"fresh\n".to_vec())]);
    }

    #[tokio::test]
    async fn test_missing_source_is_pack_error() {
        let temp = TempDir::new().unwrap();
        let err = compress_file(&temp.path().join("nope.log"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SinkError::Pipeline {
                stage: PipelineStage::Pack,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_daily_archive_naming() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("2024-02-06.log"), b"{}\n").unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 2, 6).unwrap();
        let result = compress_daily_logs(temp.path(), date, "log").await.unwrap();

        assert_eq!(result.log_file, temp.path().join("2024-02-06.log"));
        assert_eq!(
            result.archive_file,
            temp.path().join("archive.2024-02-06.log.tar.gz")
        );
        assert!(result.log_file.exists());
        assert_eq!(read_entries(&result.archive_file)[0].0, "2024-02-06.log");
    }
}
