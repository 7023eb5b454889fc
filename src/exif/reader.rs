use anyhow::{Context, Result};
use nom_exif::*;
use serde::Serialize;
use std::path::Path;

use super::block::decode_utf16le;
use super::writer::{TAG_ARTIST, TAG_IMAGE_DESCRIPTION, TAG_RATING, TAG_XP_KEYWORDS, TAG_XP_SUBJECT, TAG_XP_TITLE};

/// Geotag and descriptive tags read back from an image.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExifData {
    pub has_gps: bool,
    pub latitude_ref: Option<char>,
    pub longitude_ref: Option<char>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rating: Option<u16>,
    pub description: Option<String>,
    pub contact: Option<String>,
    pub keywords: Option<String>,
    pub location: Option<String>,
    pub caption: Option<String>,
}

/// Read geotag data from an image file with nom-exif.
///
/// A file without EXIF yields an empty [`ExifData`], not an error.
pub fn read_exif(path: &Path) -> Result<ExifData> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).context("Failed to open image file")?;

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return Ok(ExifData::default());
        }
    };

    // Parse GPS info before converting to Exif (consumes the iterator)
    let gps_info = iter.parse_gps_info().ok().flatten();
    let exif: Exif = iter.into();

    let mut data = ExifData::default();

    if let Some(gps) = gps_info {
        data.has_gps = true;
        data.latitude_ref = Some(gps.latitude_ref);
        data.longitude_ref = Some(gps.longitude_ref);
        data.latitude = Some(latlng_to_decimal(&gps.latitude, gps.latitude_ref));
        data.longitude = Some(latlng_to_decimal(&gps.longitude, gps.longitude_ref));
    }

    let ifd0 = |tag: u16| exif.get_by_ifd_tag_code(0, tag);

    data.rating = ifd0(TAG_RATING).and_then(|v| match v {
        EntryValue::U16(r) => Some(*r),
        _ => None,
    });
    data.description = ifd0(TAG_IMAGE_DESCRIPTION).and_then(entry_to_string);
    data.contact = ifd0(TAG_ARTIST).and_then(entry_to_string);
    data.keywords = ifd0(TAG_XP_KEYWORDS).and_then(xp_to_string);
    data.location = ifd0(TAG_XP_SUBJECT).and_then(xp_to_string);
    data.caption = ifd0(TAG_XP_TITLE).and_then(xp_to_string);

    Ok(data)
}

/// Convert a text EntryValue to an Option<String>.
fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = match val {
        EntryValue::Text(s) => s.clone(),
        other => other.to_string(),
    };
    let s = s.trim_end_matches('\0').trim().to_string();
    if s.is_empty() { None } else { Some(s) }
}

/// Decode an XP* tag (UTF-16LE bytes).
fn xp_to_string(val: &EntryValue) -> Option<String> {
    let s = match val {
        EntryValue::U8Array(bytes) | EntryValue::Undefined(bytes) => decode_utf16le(bytes),
        _ => return None,
    };
    if s.is_empty() { None } else { Some(s) }
}

/// Convert a nom-exif LatLng (3 URationals: deg, min, sec) to decimal degrees.
fn latlng_to_decimal(latlng: &LatLng, reference: char) -> f64 {
    let degrees = latlng.0.0 as f64 / latlng.0.1 as f64;
    let minutes = latlng.1.0 as f64 / latlng.1.1 as f64;
    let seconds = latlng.2.0 as f64 / latlng.2.1 as f64;

    let coord = degrees + minutes / 60.0 + seconds / 3600.0;

    if reference == 'S' || reference == 'W' { -coord } else { coord }
}
