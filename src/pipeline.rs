use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs::{self, File, FileTimes};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{Config, ProcessingConfig};
use crate::exif::apply_tags;
use crate::record::PhotoRecord;

/// The result of processing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Success,
    Skipped(SkipReason),
    Failed(FailReason),
}

impl ProcessingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for ProcessingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "tagged"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    #[error("no supported image files")]
    NoSupportedFiles,
    #[error("dry run")]
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    #[error("path not found")]
    NotFound,
    #[error("unsupported file format")]
    UnsupportedFormat,
    #[error("permission denied")]
    PermissionDenied,
    #[error("coordinates out of range")]
    BadCoordinates,
    #[error("backup failed: {0}")]
    Backup(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl FailReason {
    /// Map an I/O error from probing or reading a path.
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// What a record's target path expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Concrete image files to tag, in walk order.
    Files(Vec<PathBuf>),
    /// Nothing to do for this record.
    Skipped(SkipReason),
    /// The target cannot be processed.
    Failed(FailReason),
}

impl Resolution {
    /// The outcome to record when the target produced no files.
    pub fn outcome(&self) -> Option<ProcessingOutcome> {
        match self {
            Self::Files(_) => None,
            Self::Skipped(reason) => Some(ProcessingOutcome::Skipped(*reason)),
            Self::Failed(reason) => Some(ProcessingOutcome::Failed(reason.clone())),
        }
    }
}

/// Expand a target path into the image files it names.
///
/// A file resolves to itself if its extension is supported. A directory is
/// walked recursively (following symlinks); unreadable entries below the
/// top level are logged and skipped.
///
/// # Example
///
/// ```rust,no_run
/// use geo_tagger::config::ProcessingConfig;
/// use geo_tagger::pipeline::{resolve, Resolution};
/// use std::path::Path;
///
/// if let Resolution::Files(files) = resolve(Path::new("./photos/"), &ProcessingConfig::default()) {
///     println!("Found {} images", files.len());
/// }
/// ```
pub fn resolve(target: &Path, processing: &ProcessingConfig) -> Resolution {
    let metadata = match fs::metadata(target) {
        Ok(m) => m,
        Err(e) => return Resolution::Failed(FailReason::from_io(e)),
    };

    if metadata.is_file() {
        return if processing.is_supported(target) {
            Resolution::Files(vec![target.to_path_buf()])
        } else {
            Resolution::Failed(FailReason::UnsupportedFormat)
        };
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(target).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                let reason = match e.io_error().map(|io| io.kind()) {
                    Some(ErrorKind::PermissionDenied) => FailReason::PermissionDenied,
                    _ => FailReason::Io(e.to_string()),
                };
                return Resolution::Failed(reason);
            }
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {e}", target.display());
                continue;
            }
        };
        let p = entry.path();
        if entry.file_type().is_file() && processing.is_supported(p) {
            files.push(p.to_path_buf());
        }
    }

    if files.is_empty() {
        Resolution::Skipped(SkipReason::NoSupportedFiles)
    } else {
        Resolution::Files(files)
    }
}

/// Path of the backup copy for `path`: the full file name plus `suffix`.
pub fn backup_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Copy `path` to its backup sibling unless the backup already exists.
///
/// The copy keeps the original's permissions and access/modification times.
/// An existing backup is never overwritten, so it always holds the file as
/// it was before the first run that touched it.
pub fn ensure_backup(path: &Path, suffix: &str) -> Result<PathBuf> {
    let backup = backup_path(path, suffix);

    if backup.exists() {
        log::debug!("Backup already present: {}", backup.display());
        return Ok(backup);
    }

    if write_backup(path, &backup)? {
        log::debug!("Backup created: {}", backup.display());
    } else {
        log::debug!("Backup already present: {}", backup.display());
    }
    Ok(backup)
}

/// Copy `path` into a temp file beside it, then move it to `backup` if that
/// name is still free. Returns `false` when another backup got there first.
fn write_backup(path: &Path, backup: &Path) -> Result<bool> {
    let metadata = fs::metadata(path).context("Failed to read original metadata")?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut original = File::open(path).context("Failed to open original")?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).context("Failed to create backup")?;
    io::copy(&mut original, tmp.as_file_mut()).context("Failed to create backup")?;

    let times = FileTimes::new()
        .set_accessed(metadata.accessed().context("Failed to read access time")?)
        .set_modified(metadata.modified().context("Failed to read modification time")?);
    let file = tmp.as_file();
    file.set_permissions(metadata.permissions())
        .context("Failed to copy permissions to backup")?;
    file.set_times(times).context("Failed to copy timestamps to backup")?;
    file.sync_all().context("Failed to create backup")?;

    match tmp.persist_noclobber(backup) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error).context("Failed to create backup"),
    }
}

/// Tag one file: back it up if configured, then merge the record into it.
///
/// In a dry run no backup is made and the file is not modified.
pub fn process_file(path: &Path, record: &PhotoRecord, config: &Config) -> ProcessingOutcome {
    if config.output.dry_run {
        return apply_tags(path, record, true);
    }

    if config.processing.create_backup {
        if let Err(e) = ensure_backup(path, &config.processing.backup_suffix) {
            log::error!("{}: {e:#}", path.display());
            return ProcessingOutcome::Failed(FailReason::Backup(format!("{e:#}")));
        }
    }

    apply_tags(path, record, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::writer::tests::write_test_jpeg;
    use tempfile::TempDir;

    fn processing() -> ProcessingConfig {
        ProcessingConfig::default()
    }

    // ── resolve ──────────────────────────────────────────────────────

    #[test]
    fn resolve_single_supported_file() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("test.JPG");
        fs::write(&jpg, b"fake").unwrap();

        assert_eq!(resolve(&jpg, &processing()), Resolution::Files(vec![jpg]));
    }

    #[test]
    fn resolve_unsupported_file() {
        let dir = TempDir::new().unwrap();
        let png = dir.path().join("image.png");
        fs::write(&png, b"fake").unwrap();

        assert_eq!(
            resolve(&png, &processing()),
            Resolution::Failed(FailReason::UnsupportedFormat)
        );
    }

    #[test]
    fn resolve_missing_path() {
        assert_eq!(
            resolve(Path::new("/nonexistent/path.jpg"), &processing()),
            Resolution::Failed(FailReason::NotFound)
        );
    }

    #[test]
    fn resolve_directory_recursive() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        fs::write(dir.path().join("a.jpg"), b"fake").unwrap();
        fs::write(dir.path().join("b.jpeg"), b"fake").unwrap();
        fs::write(sub.join("c.JPG"), b"fake").unwrap();
        fs::write(sub.join("d.png"), b"fake").unwrap();
        fs::write(sub.join("notes.txt"), b"fake").unwrap();

        let Resolution::Files(files) = resolve(dir.path(), &processing()) else {
            panic!("expected files");
        };
        assert_eq!(files.len(), 3);
        assert!(files.contains(&sub.join("c.JPG")));
    }

    #[test]
    fn resolve_directory_without_images() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), b"fake").unwrap();

        assert_eq!(
            resolve(dir.path(), &processing()),
            Resolution::Skipped(SkipReason::NoSupportedFiles)
        );
        assert_eq!(
            resolve(dir.path(), &processing()).outcome(),
            Some(ProcessingOutcome::Skipped(SkipReason::NoSupportedFiles))
        );
    }

    #[test]
    fn resolve_ignores_backup_copies() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jpg"), b"fake").unwrap();
        fs::write(dir.path().join("a.jpg.backup"), b"fake").unwrap();

        let Resolution::Files(files) = resolve(dir.path(), &processing()) else {
            panic!("expected files");
        };
        assert_eq!(files, vec![dir.path().join("a.jpg")]);
    }

    // ── backups ──────────────────────────────────────────────────────

    #[test]
    fn backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/photos/a.jpg"), ".backup"),
            PathBuf::from("/photos/a.jpg.backup")
        );
    }

    #[test]
    fn backup_created_once() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("a.jpg");
        fs::write(&jpg, b"original").unwrap();

        let backup = ensure_backup(&jpg, ".backup").unwrap();
        assert_eq!(fs::read(&backup).unwrap(), b"original");

        fs::write(&jpg, b"modified").unwrap();
        let again = ensure_backup(&jpg, ".backup").unwrap();
        assert_eq!(again, backup);
        assert_eq!(fs::read(&backup).unwrap(), b"original");
    }

    #[test]
    fn backup_written_meanwhile_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("a.jpg");
        let backup = backup_path(&jpg, ".backup");
        fs::write(&jpg, b"original").unwrap();
        fs::write(&backup, b"original").unwrap();
        fs::write(&jpg, b"edited").unwrap();

        assert!(!write_backup(&jpg, &backup).unwrap());
        assert_eq!(fs::read(&backup).unwrap(), b"original");
    }

    #[test]
    fn backup_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("a.jpg");
        fs::write(&jpg, b"original").unwrap();

        ensure_backup(&jpg, ".backup").unwrap();
        assert!(!write_backup(&jpg, &backup_path(&jpg, ".backup")).unwrap());

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.jpg", "a.jpg.backup"]);
    }

    #[test]
    fn backup_keeps_modification_time() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("a.jpg");
        fs::write(&jpg, b"original").unwrap();
        let old = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
        File::options()
            .write(true)
            .open(&jpg)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let backup = ensure_backup(&jpg, ".backup").unwrap();
        assert_eq!(fs::metadata(&backup).unwrap().modified().unwrap(), old);
    }

    #[test]
    fn backup_of_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(ensure_backup(&dir.path().join("gone.jpg"), ".backup").is_err());
    }

    // ── process_file ─────────────────────────────────────────────────

    #[test]
    fn process_file_backs_up_then_tags() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("a.jpg");
        write_test_jpeg(&jpg);
        let original = fs::read(&jpg).unwrap();

        let outcome = process_file(&jpg, &PhotoRecord::new(&jpg, 10.0, 20.0), &Config::default());

        assert_eq!(outcome, ProcessingOutcome::Success);
        assert_eq!(fs::read(backup_path(&jpg, ".backup")).unwrap(), original);
        assert_ne!(fs::read(&jpg).unwrap(), original);
    }

    #[test]
    fn process_file_without_backup() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("a.jpg");
        write_test_jpeg(&jpg);
        let mut config = Config::default();
        config.processing.create_backup = false;

        let outcome = process_file(&jpg, &PhotoRecord::new(&jpg, 10.0, 20.0), &config);

        assert_eq!(outcome, ProcessingOutcome::Success);
        assert!(!backup_path(&jpg, ".backup").exists());
    }

    #[test]
    fn process_file_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("a.jpg");
        write_test_jpeg(&jpg);
        let original = fs::read(&jpg).unwrap();
        let mut config = Config::default();
        config.output.dry_run = true;

        let outcome = process_file(&jpg, &PhotoRecord::new(&jpg, 10.0, 20.0), &config);

        assert_eq!(outcome, ProcessingOutcome::Skipped(SkipReason::DryRun));
        assert_eq!(fs::read(&jpg).unwrap(), original);
        assert!(!backup_path(&jpg, ".backup").exists());
    }

    #[test]
    fn outcome_serializes_with_reason() {
        let json = serde_json::to_value(ProcessingOutcome::Failed(FailReason::NotFound)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed", "reason": "not_found"}));
        let json = serde_json::to_value(ProcessingOutcome::Success).unwrap();
        assert_eq!(json, serde_json::json!({"status": "success"}));
    }
}
