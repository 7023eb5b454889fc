//! Batch runner: validate rows, expand targets, and tag files on a fixed worker pool.

use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::geo::LocationLookup;
use crate::pipeline::{ProcessingOutcome, Resolution, process_file, resolve};
use crate::record::{PhotoRecord, RawRow, Verdict, validate};

/// Run-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("no valid rows to process")]
    NoValidInput,
}

/// Outcome for one file (or for a target that produced no files).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    /// Spreadsheet line of the originating row (the header is line 1).
    pub row: usize,
    pub outcome: ProcessingOutcome,
}

/// Position in the run, reported after each file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

/// Totals for a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub success_count: usize,
    pub error_count: usize,
    /// Dry-run files and targets without supported files.
    pub skipped_count: usize,
    /// Rows excluded by validation.
    pub rejected_rows: usize,
    pub reports: Vec<FileReport>,
}

impl RunSummary {
    fn record(&mut self, report: FileReport) {
        match &report.outcome {
            ProcessingOutcome::Success => self.success_count += 1,
            ProcessingOutcome::Skipped(_) => self.skipped_count += 1,
            ProcessingOutcome::Failed(_) => self.error_count += 1,
        }
        self.reports.push(report);
    }
}

struct WorkItem {
    path: PathBuf,
    row: usize,
    record: Arc<PhotoRecord>,
}

/// Drives a whole run over spreadsheet rows.
///
/// # Example
///
/// ```rust,no_run
/// use geo_tagger::batch::BatchRunner;
/// use geo_tagger::config::Config;
/// # async fn example(rows: Vec<geo_tagger::record::RawRow>) -> anyhow::Result<()> {
/// let summary = BatchRunner::new(Config::default()).run(&rows).await?;
/// println!("{} succeeded, {} failed", summary.success_count, summary.error_count);
/// # Ok(())
/// # }
/// ```
pub struct BatchRunner {
    config: Arc<Config>,
    lookup: Option<LocationLookup>,
}

impl BatchRunner {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            lookup: None,
        }
    }

    /// Fill missing location columns by reverse geocoding each record's coordinates.
    pub fn with_lookup(mut self, lookup: LocationLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub async fn run(&self, rows: &[RawRow]) -> Result<RunSummary, BatchError> {
        self.run_with(rows, |_, _| {}).await
    }

    /// Like [`run`](Self::run), calling `on_progress` once per report as it arrives.
    pub async fn run_with<F>(&self, rows: &[RawRow], mut on_progress: F) -> Result<RunSummary, BatchError>
    where
        F: FnMut(&FileReport, Progress),
    {
        let mut summary = RunSummary::default();

        let mut records = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let line = i + 2;
            match validate(row) {
                Verdict::Valid { record, warnings } => {
                    for warning in warnings {
                        log::warn!("Row {line}: {warning}");
                    }
                    records.push((line, record));
                }
                Verdict::Invalid(reasons) => {
                    log::warn!("Row {line} rejected: {}", reasons.join("; "));
                    summary.rejected_rows += 1;
                }
            }
        }

        if records.is_empty() {
            log::error!("No valid rows to process ({} rejected)", summary.rejected_rows);
            return Err(BatchError::NoValidInput);
        }
        log::info!("{} valid rows, {} rejected", records.len(), summary.rejected_rows);

        if let Some(lookup) = &self.lookup {
            let mut enriched = Vec::with_capacity(records.len());
            for (line, record) in records {
                if record.has_location() {
                    enriched.push((line, record));
                    continue;
                }
                match lookup.locate(record.latitude, record.longitude).await {
                    Some(place) => {
                        log::debug!("Row {line}: location filled from geocoder");
                        enriched.push((line, record.with_location(&place)));
                    }
                    None => enriched.push((line, record)),
                }
            }
            records = enriched;
        }

        let mut items = VecDeque::new();
        let mut unresolved = Vec::new();
        for (line, record) in records {
            match resolve(&record.target_path, &self.config.processing) {
                Resolution::Files(files) => {
                    let record = Arc::new(record);
                    items.extend(files.into_iter().map(|path| WorkItem {
                        path,
                        row: line,
                        record: Arc::clone(&record),
                    }));
                }
                other => {
                    if let Some(outcome) = other.outcome() {
                        log::warn!("Row {line}: {}: {outcome}", record.target_path.display());
                        unresolved.push(FileReport {
                            path: record.target_path,
                            row: line,
                            outcome,
                        });
                    }
                }
            }
        }

        let total = items.len() + unresolved.len();
        let mut done = 0;
        for report in unresolved {
            done += 1;
            on_progress(&report, Progress { done, total });
            summary.record(report);
        }

        let file_count = items.len();
        let workers = self.config.processing.max_workers.max(1).min(file_count.max(1));
        log::info!("Tagging {file_count} files with {workers} workers");

        let queue = Arc::new(Mutex::new(items));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut set = JoinSet::new();
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let config = Arc::clone(&self.config);
            let tx = tx.clone();
            set.spawn_blocking(move || {
                while let Some(item) = next_item(&queue) {
                    let outcome = process_file(&item.path, &item.record, &config);
                    let report = FileReport {
                        path: item.path,
                        row: item.row,
                        outcome,
                    };
                    if tx.send(report).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        while let Some(report) = rx.recv().await {
            done += 1;
            log::info!("[{done}/{total}] {}: {}", report.path.display(), report.outcome);
            on_progress(&report, Progress { done, total });
            summary.record(report);
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                log::error!("Worker failed: {e}");
            }
        }

        // Files a failed worker took but never reported
        let lost = total - done;
        if lost > 0 {
            log::error!("{lost} files were not processed");
            summary.error_count += lost;
        }

        Ok(summary)
    }
}

fn next_item(queue: &Mutex<VecDeque<WorkItem>>) -> Option<WorkItem> {
    queue.lock().ok()?.pop_front()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::writer::tests::write_test_jpeg;
    use crate::exif::{Section, read_exif};
    use crate::geo::GeoCache;
    use crate::geo::geocoder::tests::FlakyGeocoder;
    use crate::pipeline::{FailReason, SkipReason, backup_path};
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    fn row(path: &Path, lat: &str, lon: &str) -> RawRow {
        [
            ("path".to_string(), path.display().to_string()),
            ("latitude".to_string(), lat.to_string()),
            ("longitude".to_string(), lon.to_string()),
        ]
        .into_iter()
        .collect()
    }

    fn photo_dir(count: usize) -> TempDir {
        let dir = TempDir::new().unwrap();
        for i in 0..count {
            write_test_jpeg(&dir.path().join(format!("p{i}.jpg")));
        }
        std::fs::write(dir.path().join("notes.txt"), b"not a photo").unwrap();
        std::fs::write(dir.path().join("preview.png"), b"not a jpeg").unwrap();
        dir
    }

    // ── runs ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn directory_row_tags_every_photo() {
        let dir = photo_dir(3);
        let mut rating_row = row(dir.path(), "55.7558", "37.6173");
        rating_row.insert("rating".into(), "4".into());

        let summary = BatchRunner::new(Config::default()).run(&[rating_row]).await.unwrap();

        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.error_count, 0);
        for i in 0..3 {
            let path = dir.path().join(format!("p{i}.jpg"));
            let data = read_exif(&path).unwrap();
            assert_eq!(data.latitude_ref, Some('N'));
            assert_eq!(data.rating, Some(4));
            assert!(backup_path(&path, ".backup").exists());
        }
    }

    #[tokio::test]
    async fn sheet_row_tags_plain_jpeg() {
        let dir = TempDir::new().unwrap();
        let photo = dir.path().join("photo.jpg");
        write_test_jpeg(&photo);
        let sheet_row: RawRow = [
            ("target_path", photo.display().to_string()),
            ("latitude", "55.7558".to_string()),
            ("longitude", "37.6173".to_string()),
            ("Rating", "5".to_string()),
            ("Keywords", "travel, city".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let summary = BatchRunner::new(Config::default()).run(&[sheet_row]).await.unwrap();

        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.error_count, 0);
        let data = read_exif(&photo).unwrap();
        assert_eq!(data.latitude_ref, Some('N'));
        assert_eq!(data.longitude_ref, Some('E'));
        assert!((data.latitude.unwrap() - 55.7558).abs() < 1e-3);
        assert!((data.longitude.unwrap() - 37.6173).abs() < 1e-3);
        assert_eq!(data.rating, Some(5));
        assert_eq!(data.keywords.as_deref(), Some("travel; city"));
    }

    #[tokio::test]
    async fn directory_yields_one_report_per_photo() {
        let dir = photo_dir(3);

        let summary = BatchRunner::new(Config::default())
            .run(&[row(dir.path(), "55.7558", "37.6173")])
            .await
            .unwrap();

        assert_eq!(summary.reports.len(), 3);
        assert_eq!(summary.success_count, 3);
        assert!(summary.reports.iter().all(|r| r.path.extension().is_some_and(|e| e == "jpg")));
        assert!(!backup_path(&dir.path().join("preview.png"), ".backup").exists());
    }

    #[tokio::test]
    async fn invalid_rows_are_excluded() {
        let dir = photo_dir(1);
        let good = dir.path().join("p0.jpg");
        let rows = vec![row(&good, "10", "20"), row(&good, "200", "20"), row(&good, "", "20")];

        let summary = BatchRunner::new(Config::default()).run(&rows).await.unwrap();

        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.rejected_rows, 2);
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].row, 2);
    }

    #[tokio::test]
    async fn all_invalid_rows_stop_the_run() {
        let rows = vec![row(Path::new("/a.jpg"), "91", "0"), row(Path::new(""), "1", "1")];
        let result = BatchRunner::new(Config::default()).run(&rows).await;
        assert_eq!(result.unwrap_err(), BatchError::NoValidInput);

        let result = BatchRunner::new(Config::default()).run(&[]).await;
        assert_eq!(result.unwrap_err(), BatchError::NoValidInput);
    }

    #[tokio::test]
    async fn unresolvable_targets_are_counted() {
        let empty = TempDir::new().unwrap();
        let photos = photo_dir(1);
        let rows = vec![
            row(Path::new("/nonexistent/photo.jpg"), "1", "1"),
            row(empty.path(), "1", "1"),
            row(&photos.path().join("notes.txt"), "1", "1"),
            row(&photos.path().join("p0.jpg"), "1", "1"),
        ];

        let summary = BatchRunner::new(Config::default()).run(&rows).await.unwrap();

        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.error_count, 2);
        assert_eq!(summary.skipped_count, 1);
        let outcomes: Vec<_> = summary.reports.iter().map(|r| r.outcome.clone()).collect();
        assert!(outcomes.contains(&ProcessingOutcome::Failed(FailReason::NotFound)));
        assert!(outcomes.contains(&ProcessingOutcome::Failed(FailReason::UnsupportedFormat)));
        assert!(outcomes.contains(&ProcessingOutcome::Skipped(SkipReason::NoSupportedFiles)));
    }

    #[tokio::test]
    async fn progress_counts_up_to_total() {
        let dir = photo_dir(5);
        let mut config = Config::default();
        config.processing.max_workers = 2;
        config.processing.create_backup = false;

        let mut seen = Vec::new();
        let summary = BatchRunner::new(config)
            .run_with(&[row(dir.path(), "1", "2")], |_, p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(summary.success_count, 5);
        assert_eq!(seen.len(), 5);
        for (i, p) in seen.iter().enumerate() {
            assert_eq!(p.done, i + 1);
            assert_eq!(p.total, 5);
        }
    }

    #[tokio::test]
    async fn dry_run_counts_skips_and_writes_nothing() {
        let dir = photo_dir(2);
        let before = std::fs::read(dir.path().join("p0.jpg")).unwrap();
        let mut config = Config::default();
        config.output.dry_run = true;

        let summary = BatchRunner::new(config).run(&[row(dir.path(), "1", "2")]).await.unwrap();

        assert_eq!(summary.skipped_count, 2);
        assert_eq!(summary.success_count, 0);
        assert_eq!(std::fs::read(dir.path().join("p0.jpg")).unwrap(), before);
        assert!(!backup_path(&dir.path().join("p0.jpg"), ".backup").exists());
    }

    #[tokio::test]
    async fn single_worker_handles_everything() {
        let dir = photo_dir(3);
        let mut config = Config::default();
        config.processing.max_workers = 0;

        let summary = BatchRunner::new(config).run(&[row(dir.path(), "1", "2")]).await.unwrap();
        assert_eq!(summary.success_count, 3);
    }

    // ── location enrichment ──────────────────────────────────────────

    #[tokio::test]
    async fn missing_location_is_geocoded_once_per_row() {
        let dir = photo_dir(2);
        let geocoder = FlakyGeocoder::answering();
        let calls = Arc::clone(&geocoder.calls);
        let lookup = LocationLookup::new(Box::new(geocoder), GeoCache::in_memory(), 3, Duration::ZERO);

        let summary = BatchRunner::new(Config::default())
            .with_lookup(lookup)
            .run(&[row(dir.path(), "55.7558", "37.6173")])
            .await
            .unwrap();

        assert_eq!(summary.success_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let data = read_exif(&dir.path().join("p1.jpg")).unwrap();
        assert_eq!(data.location.as_deref(), Some("Moscow, Russia, 109012, Red Square, Moscow, Russia"));
    }

    #[tokio::test]
    async fn rows_with_location_skip_the_geocoder() {
        let dir = photo_dir(1);
        let geocoder = FlakyGeocoder::answering();
        let calls = Arc::clone(&geocoder.calls);
        let lookup = LocationLookup::new(Box::new(geocoder), GeoCache::in_memory(), 3, Duration::ZERO);
        let mut with_city = row(&dir.path().join("p0.jpg"), "1", "2");
        with_city.insert("city".into(), "Kazan".into());

        let summary = BatchRunner::new(Config::default())
            .with_lookup(lookup)
            .run(&[with_city])
            .await
            .unwrap();

        assert_eq!(summary.success_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let block = {
            let bytes = std::fs::read(dir.path().join("p0.jpg")).unwrap();
            let jpeg = img_parts::jpeg::Jpeg::from_bytes(bytes.into()).unwrap();
            use img_parts::ImageEXIF;
            crate::exif::MetadataBlock::from_tiff(&jpeg.exif().unwrap()).unwrap()
        };
        assert_eq!(
            block.utf16(Section::Image, crate::exif::writer::TAG_XP_SUBJECT).as_deref(),
            Some("Kazan")
        );
    }

    #[tokio::test]
    async fn summary_serializes_counts() {
        let dir = photo_dir(1);
        let summary = BatchRunner::new(Config::default())
            .run(&[row(&dir.path().join("p0.jpg"), "1", "2")])
            .await
            .unwrap();

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["success_count"], 1);
        assert_eq!(json["error_count"], 0);
        assert_eq!(json["reports"][0]["outcome"]["status"], "success");
    }
}
