use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use geo_tagger::batch::BatchRunner;
use geo_tagger::geo::LocationLookup;
use geo_tagger::pipeline::{Resolution, resolve};
use geo_tagger::sheet::{GoogleSheetSource, JsonFileSource, RowSource};
use geo_tagger::{config, exif};

const LOG_FILE: &str = "geo_tagger.log";
const SHEETS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "geo-tagger",
    version,
    about = "Spreadsheet-driven photo geotagging — write coordinates, ratings, keywords, and captions into JPEG EXIF"
)]
struct Cli {
    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Read rows from an exported JSON file instead of Google Sheets
    #[arg(long, value_name = "FILE")]
    rows: Option<PathBuf>,

    /// Merge tags in memory only; no file is backed up or modified
    #[arg(long)]
    dry_run: bool,

    /// Do not create `.backup` copies before modifying files
    #[arg(long)]
    no_backup: bool,

    /// Worker pool size
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Fill missing location columns by reverse geocoding the coordinates
    #[arg(long)]
    geocode: bool,

    /// Output the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Display the geotag fields of images (files or directories) and exit
    #[arg(long, value_name = "PATH", num_args = 1..)]
    show: Vec<PathBuf>,
}

/// Log target that writes to stderr and, once attached, to the run log file.
#[derive(Clone, Default)]
struct LogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl LogSink {
    fn attach(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        if let Ok(mut slot) = self.file.lock() {
            *slot = Some(file);
        }
        Ok(())
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut slot) = self.file.lock() {
            if let Some(Err(e)) = slot.as_mut().map(|file| file.write_all(buf)) {
                // Detach so later lines go to stderr only
                *slot = None;
                let _ = writeln!(io::stderr(), "Log file write failed, no longer logging to file: {e}");
            }
        }
        io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let sink = LogSink::default();
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .target(env_logger::Target::Pipe(Box::new(sink.clone())))
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    // Handle --show
    if !cli.show.is_empty() {
        let processing = config::ProcessingConfig::default();
        for target in &cli.show {
            match resolve(target, &processing) {
                Resolution::Files(images) => {
                    for image_path in &images {
                        print_geotags(image_path)?;
                    }
                }
                other => {
                    if let Some(outcome) = other.outcome() {
                        log::warn!("{}: {outcome}", target.display());
                    }
                }
            }
        }
        return Ok(());
    }

    // Load config: file, then environment, then flags
    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply_env();
    if cli.dry_run {
        config.output.dry_run = true;
    }
    if cli.no_backup {
        config.processing.create_backup = false;
    }
    if let Some(workers) = cli.workers {
        config.processing.max_workers = workers;
    }
    if cli.geocode {
        config.geocoding.enabled = true;
    }

    config.ensure_directories()?;
    if let Err(e) = sink.attach(&config.output.log_dir.join(LOG_FILE)) {
        log::warn!("{e:#}");
    }

    let source: Box<dyn RowSource> = match &cli.rows {
        Some(path) => Box::new(JsonFileSource::new(path)),
        None => Box::new(GoogleSheetSource::new(&config.sheet, SHEETS_TIMEOUT)?),
    };

    log::info!("Reading rows from {}", source.describe());
    let rows = source.fetch_rows().await.context("Failed to fetch rows")?;
    log::info!("Fetched {} row(s)", rows.len());

    if config.output.dry_run {
        log::info!("DRY RUN — no files will be modified");
    }

    let mut runner = BatchRunner::new(config.clone());
    if config.geocoding.enabled {
        let lookup = LocationLookup::from_config(&config.geocoding, &config.output.cache_dir)?;
        log::info!("Geocoding enabled ({} cached places)", lookup.cache().len());
        runner = runner.with_lookup(lookup);
    }

    let summary = runner.run(&rows).await?;

    // JSON output
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    // Summary
    log::info!(
        "Done: {} succeeded, {} failed, {} skipped; {} row(s) rejected",
        summary.success_count,
        summary.error_count,
        summary.skipped_count,
        summary.rejected_rows
    );

    Ok(())
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

/// Print the geotag fields of one image.
fn print_geotags(path: &Path) -> Result<()> {
    let data = exif::read_exif(path)?;

    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    if data.has_gps {
        println!("  {BOLD}GPS{RESET}");
        println!("  {DIM}{}{RESET}", "─".repeat(70));
        if let (Some(lat), Some(r)) = (data.latitude, data.latitude_ref) {
            print_row("GPSLatitude", &format!("{lat:.6} ({r})"));
        }
        if let (Some(lon), Some(r)) = (data.longitude, data.longitude_ref) {
            print_row("GPSLongitude", &format!("{lon:.6} ({r})"));
        }
        println!();
    }

    let rating = data.rating.map(|r| r.to_string());
    let desc_fields: Vec<(&str, Option<&str>)> = vec![
        ("Rating", rating.as_deref()),
        ("XPKeywords", data.keywords.as_deref()),
        ("ImageDescription", data.description.as_deref()),
        ("Artist", data.contact.as_deref()),
        ("XPSubject", data.location.as_deref()),
        ("XPTitle", data.caption.as_deref()),
    ];
    if desc_fields.iter().any(|(_, v)| v.is_some()) {
        println!("  {BOLD}Descriptive Metadata{RESET}");
        println!("  {DIM}{}{RESET}", "─".repeat(70));
        for (tag, val) in &desc_fields {
            if let Some(v) = val {
                print_row(tag, v);
            }
        }
        println!();
    }

    if !data.has_gps && desc_fields.iter().all(|(_, v)| v.is_none()) {
        println!("  {DIM}(no geotag metadata found){RESET}");
        println!();
    }

    Ok(())
}

/// Print a single row in the display table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width. Embedded newlines start a new line.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in s.lines() {
        let mut current_line = String::new();
        for word in paragraph.split_whitespace() {
            if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_line.chars().count() + 1 + word.chars().count() <= max_width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                lines.push(current_line);
                current_line = word.to_string();
            }
        }
        if !current_line.is_empty() {
            lines.push(current_line);
        }
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_text_respects_width() {
        let lines = wrap_text("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }

    #[test]
    fn wrap_text_keeps_newlines() {
        let lines = wrap_text("Ivan\nEmail: ivan@example.com", 46);
        assert_eq!(lines, vec!["Ivan", "Email: ivan@example.com"]);
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Cli::parse_from(["geo-tagger", "--rows", "rows.json", "--dry-run", "--workers", "8", "--no-backup"]);
        assert_eq!(cli.rows.as_deref(), Some(Path::new("rows.json")));
        assert!(cli.dry_run);
        assert!(cli.no_backup);
        assert_eq!(cli.workers, Some(8));
        assert!(cli.show.is_empty());
    }

    #[test]
    fn log_sink_detaches_failing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE);
        std::fs::write(&path, b"").unwrap();
        let read_only = File::open(&path).unwrap();
        let mut sink = LogSink::default();
        *sink.file.lock().unwrap() = Some(read_only);

        sink.write_all(b"first\n").unwrap();
        assert!(sink.file.lock().unwrap().is_none());
        sink.write_all(b"second\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn log_sink_copies_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE);
        let mut sink = LogSink::default();
        sink.attach(&path).unwrap();
        sink.write_all(b"hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
