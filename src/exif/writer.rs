use img_parts::jpeg::Jpeg;
use img_parts::{Bytes, ImageEXIF};
use std::io::Write;
use std::path::Path;

use super::block::{MetadataBlock, Section, Value};
use crate::geo::{in_range, to_gps_fields};
use crate::pipeline::{FailReason, ProcessingOutcome, SkipReason};
use crate::record::PhotoRecord;

// GPS section
pub const TAG_GPS_VERSION_ID: u16 = 0x0000;
pub const TAG_GPS_LATITUDE_REF: u16 = 0x0001;
pub const TAG_GPS_LATITUDE: u16 = 0x0002;
pub const TAG_GPS_LONGITUDE_REF: u16 = 0x0003;
pub const TAG_GPS_LONGITUDE: u16 = 0x0004;

// Image section
pub const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
pub const TAG_ARTIST: u16 = 0x013B;
pub const TAG_RATING: u16 = 0x4746;
pub const TAG_RATING_PERCENT: u16 = 0x4749;
pub const TAG_XP_TITLE: u16 = 0x9C9B;
pub const TAG_XP_KEYWORDS: u16 = 0x9C9E;
pub const TAG_XP_SUBJECT: u16 = 0x9C9F;

const GPS_VERSION: [u8; 4] = [2, 2, 0, 0];

/// APP1 payload limit: 65535 minus the length field and the `Exif\0\0` prefix.
const MAX_TIFF_LEN: usize = 65535 - 2 - 6;

/// Which descriptive fields a merge touched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergeReport {
    pub written: Vec<&'static str>,
    /// Fields that could not be encoded, with the reason. The rest of the merge went ahead.
    pub failed: Vec<(&'static str, String)>,
}

/// Merge a record's GPS and descriptive fields into `path` and write the file back.
///
/// Strategy:
/// 1. Read the JPEG with img-parts (keeps every other segment as is)
/// 2. Decode the existing EXIF block, or start a fresh one if it is absent or corrupt
/// 3. Merge GPS, then each descriptive field independently
/// 4. Re-encode the block, put the EXIF segment back in place, and replace the file atomically
///
/// With `dry_run` the merge runs in memory only and the outcome is `Skipped(DryRun)`.
pub fn apply_tags(path: &Path, record: &PhotoRecord, dry_run: bool) -> ProcessingOutcome {
    match write_tags(path, record, dry_run) {
        Ok(report) if dry_run => {
            log::info!("[dry run] {}: would write {}", path.display(), report.written.join(", "));
            ProcessingOutcome::Skipped(SkipReason::DryRun)
        }
        Ok(report) => {
            log::debug!("{}: wrote {}", path.display(), report.written.join(", "));
            ProcessingOutcome::Success
        }
        Err(reason) => {
            log::error!("{}: {reason}", path.display());
            ProcessingOutcome::Failed(reason)
        }
    }
}

fn write_tags(path: &Path, record: &PhotoRecord, dry_run: bool) -> Result<MergeReport, FailReason> {
    if !in_range(record.latitude, record.longitude) {
        return Err(FailReason::BadCoordinates);
    }

    let file_bytes = std::fs::read(path).map_err(FailReason::from_io)?;
    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| FailReason::Write(format!("not a readable JPEG: {e}")))?;

    let orig_exif_pos = find_exif_segment_pos(&jpeg);
    let mut block = load_block(&jpeg, path);

    let report = merge_record(&mut block, record)?;
    for (field, reason) in &report.failed {
        log::warn!("{}: skipped {field}: {reason}", path.display());
    }

    let tiff = block
        .to_tiff()
        .map_err(|e| FailReason::Write(format!("failed to encode metadata: {e}")))?;
    if tiff.len() > MAX_TIFF_LEN {
        return Err(FailReason::Write(format!(
            "metadata block is {} bytes, over the {MAX_TIFF_LEN} byte segment limit",
            tiff.len()
        )));
    }

    if dry_run {
        return Ok(report);
    }

    jpeg.set_exif(Some(Bytes::from(tiff)));

    // set_exif() inserts at a fixed position, which may be after XMP APP1.
    // Move the EXIF segment back to where it was (or right after APP0).
    if let Some(new_pos) = find_exif_segment_pos(&jpeg) {
        let target_pos = orig_exif_pos.unwrap_or(1);
        if target_pos < new_pos {
            let segments = jpeg.segments_mut();
            let seg = segments.remove(new_pos);
            segments.insert(target_pos, seg);
        }
    }

    let output = jpeg.encoder().bytes();
    replace_file(path, &output).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => FailReason::PermissionDenied,
        _ => FailReason::Write(e.to_string()),
    })?;

    Ok(report)
}

/// Decode the JPEG's EXIF block, falling back to a fresh block.
fn load_block(jpeg: &Jpeg, path: &Path) -> MetadataBlock {
    let Some(raw) = jpeg.exif() else {
        log::debug!("{}: no EXIF block, starting fresh", path.display());
        return MetadataBlock::new();
    };
    match MetadataBlock::from_tiff(&raw) {
        Ok(block) => block,
        Err(e) => {
            log::warn!("{}: unreadable EXIF block ({e}), starting fresh", path.display());
            MetadataBlock::new()
        }
    }
}

/// Merge GPS and descriptive fields of `record` into `block`.
///
/// GPS failures are fatal; descriptive fields are best-effort and recorded in the report.
pub fn merge_record(block: &mut MetadataBlock, record: &PhotoRecord) -> Result<MergeReport, FailReason> {
    let gps = to_gps_fields(record.latitude, record.longitude);
    block.ensure_section(Section::Gps);
    if block.get(Section::Gps, TAG_GPS_VERSION_ID).is_none() {
        set_gps(block, TAG_GPS_VERSION_ID, Value::Byte(GPS_VERSION.to_vec()))?;
    }
    set_gps(block, TAG_GPS_LATITUDE_REF, Value::Ascii(gps.latitude_ref.to_string()))?;
    set_gps(block, TAG_GPS_LATITUDE, Value::Rational(gps.latitude.to_vec()))?;
    set_gps(block, TAG_GPS_LONGITUDE_REF, Value::Ascii(gps.longitude_ref.to_string()))?;
    set_gps(block, TAG_GPS_LONGITUDE, Value::Rational(gps.longitude.to_vec()))?;

    let mut report = MergeReport {
        written: vec!["gps"],
        failed: Vec::new(),
    };

    if let Some(rating) = record.rating.filter(|r| *r <= 5) {
        let percent = rating_percent(rating);
        attach(block, &mut report, "rating", &[
            (TAG_RATING, Value::Short(vec![u16::from(rating)])),
            (TAG_RATING_PERCENT, Value::Short(vec![percent])),
        ]);
    }

    let keywords: Vec<&str> = [record.category.as_deref(), record.subcategory.as_deref()]
        .into_iter()
        .flatten()
        .chain(record.keywords.iter().map(String::as_str))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect();
    if !keywords.is_empty() {
        attach(block, &mut report, "keywords", &[(TAG_XP_KEYWORDS, Value::Utf16(keywords.join("; ")))]);
    }

    if let Some(description) = non_empty(&record.description) {
        attach(block, &mut report, "description", &[(
            TAG_IMAGE_DESCRIPTION,
            Value::Ascii(description.to_string()),
        )]);
    }

    let contact = join_present(
        &[
            non_empty(&record.contacts).map(str::to_string),
            non_empty(&record.email).map(|e| format!("Email: {e}")),
            non_empty(&record.url).map(|u| format!("URL: {u}")),
        ],
        "\n",
    );
    if let Some(contact) = contact {
        attach(block, &mut report, "contact", &[(TAG_ARTIST, Value::Ascii(contact))]);
    }

    let location = join_present(
        &[
            non_empty(&record.city).map(str::to_string),
            non_empty(&record.country).map(str::to_string),
            non_empty(&record.postcode).map(str::to_string),
            non_empty(&record.address).map(str::to_string),
        ],
        ", ",
    );
    if let Some(location) = location {
        attach(block, &mut report, "location", &[(TAG_XP_SUBJECT, Value::Utf16(location))]);
    }

    let caption = join_present(
        &[
            non_empty(&record.caption).map(str::to_string),
            non_empty(&record.caption_text).map(str::to_string),
        ],
        "\n",
    );
    if let Some(caption) = caption {
        attach(block, &mut report, "caption", &[(TAG_XP_TITLE, Value::Utf16(caption))]);
    }

    Ok(report)
}

fn set_gps(block: &mut MetadataBlock, tag: u16, value: Value) -> Result<(), FailReason> {
    block
        .set(Section::Gps, tag, value)
        .map_err(|e| FailReason::Write(format!("failed to set GPS tag {tag:#06x}: {e}")))
}

/// Store one logical field (one or more tags) into the image section; all or nothing.
fn attach(block: &mut MetadataBlock, report: &mut MergeReport, field: &'static str, tags: &[(u16, Value)]) {
    let mut staged = block.clone();
    for (tag, value) in tags {
        if let Err(e) = staged.set(Section::Image, *tag, value.clone()) {
            report.failed.push((field, e.to_string()));
            return;
        }
    }
    *block = staged;
    report.written.push(field);
}

/// Windows RatingPercent for a 0–5 star rating.
fn rating_percent(rating: u8) -> u16 {
    match rating {
        0 => 0,
        1 => 1,
        2 => 25,
        3 => 50,
        4 => 75,
        _ => 99,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn join_present(parts: &[Option<String>], separator: &str) -> Option<String> {
    let present: Vec<&str> = parts.iter().flatten().map(String::as_str).collect();
    if present.is_empty() {
        None
    } else {
        Some(present.join(separator))
    }
}

/// Find the position of the EXIF APP1 segment in a JPEG.
/// EXIF segments have marker 0xE1 (APP1) and contents starting with "Exif\0\0".
fn find_exif_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    const EXIF_PREFIX: &[u8] = b"Exif\0\0";
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(EXIF_PREFIX))
}

/// Write `data` to a temp file next to `path`, then rename it over `path`.
fn replace_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let permissions = std::fs::metadata(path)?.permissions();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    std::fs::set_permissions(tmp.path(), permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
