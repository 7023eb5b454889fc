//! # geo-tagger
//!
//! Spreadsheet-driven photo geotagging — read photo rows (path, coordinates, rating,
//! keywords, contacts, location, caption) from Google Sheets and write them into the
//! EXIF metadata of JPEG files, keeping every untouched tag intact.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use geo_tagger::batch::BatchRunner;
//! use geo_tagger::config::Config;
//! use geo_tagger::sheet::{JsonFileSource, RowSource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!
//!     // Rows exported from the sheet; GoogleSheetSource reads them live
//!     let rows = JsonFileSource::new("rows.json").fetch_rows().await?;
//!
//!     let summary = BatchRunner::new(config).run(&rows).await?;
//!     println!("{} succeeded, {} failed", summary.success_count, summary.error_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! ```rust,no_run
//! use geo_tagger::exif::{apply_tags, read_exif};
//! use geo_tagger::record::PhotoRecord;
//! use std::path::Path;
//!
//! let path = Path::new("photo.jpg");
//! let mut record = PhotoRecord::new(path, 55.7558, 37.6173);
//! record.keywords = vec!["travel".into(), "city".into()];
//!
//! let outcome = apply_tags(path, &record, false);
//! println!("{outcome}");
//! println!("{:?}", read_exif(path).unwrap().latitude);
//! ```
//!
//! ## Written Tags
//!
//! | Field | Tag |
//! |-------|-----|
//! | Coordinates | GPSLatitude/Longitude + Ref (GPS section) |
//! | Rating | Rating + RatingPercent |
//! | Category, subcategory, keywords | XPKeywords |
//! | Description | ImageDescription |
//! | Contacts, email, URL | Artist |
//! | City, country, postcode, address | XPSubject |
//! | Caption, caption text | XPTitle |
//!
//! ## Modules
//!
//! - [`batch`] — Run driver: validation, target expansion, worker pool, counters
//! - [`config`] — Configuration types, loading/saving, environment overrides
//! - [`exif`] — EXIF block codec, tag merging, and reading
//! - [`geo`] — Coordinate conversion and reverse geocoding
//! - [`pipeline`] — Per-file outcomes, path resolution, backups
//! - [`record`] — Typed photo records and the row validator
//! - [`sheet`] — Row sources (Google Sheets, exported JSON)

pub mod batch;
pub mod config;
pub mod exif;
pub mod geo;
pub mod pipeline;
pub mod record;
pub mod sheet;
