//! Typed photo records and the spreadsheet row validator.
//!
//! Spreadsheet rows arrive as free-form `header → cell` maps. [`validate`]
//! resolves them once into a [`PhotoRecord`]; everything downstream works
//! with the typed record only.

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::geo::Place;

/// One spreadsheet row: header name → cell text.
pub type RawRow = BTreeMap<String, String>;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid email regex")
});

/// A validated photo row. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoRecord {
    /// File or directory to tag.
    pub target_path: PathBuf,
    pub latitude: f64,
    pub longitude: f64,
    /// Star rating, 0–5.
    pub rating: Option<u8>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// Keywords split on commas and trimmed.
    pub keywords: Vec<String>,
    pub description: Option<String>,
    pub contacts: Option<String>,
    pub email: Option<String>,
    pub url: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub postcode: Option<String>,
    pub address: Option<String>,
    pub caption: Option<String>,
    pub caption_text: Option<String>,
    /// Columns this tool does not interpret, carried verbatim.
    pub extra: BTreeMap<String, String>,
}

impl PhotoRecord {
    pub fn new(target_path: impl Into<PathBuf>, latitude: f64, longitude: f64) -> Self {
        Self {
            target_path: target_path.into(),
            latitude,
            longitude,
            ..Self::default()
        }
    }

    /// Whether any of the location columns carries a value.
    pub fn has_location(&self) -> bool {
        self.city.is_some() || self.country.is_some() || self.postcode.is_some() || self.address.is_some()
    }

    /// A copy of this record with empty location columns taken from a geocoded place.
    pub fn with_location(&self, place: &Place) -> Self {
        Self {
            city: self.city.clone().or_else(|| present(&place.city)),
            country: self.country.clone().or_else(|| present(&place.country)),
            postcode: self.postcode.clone().or_else(|| present(&place.postcode)),
            address: self.address.clone().or_else(|| present(&place.address)),
            ..self.clone()
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

/// Outcome of validating one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The row can be processed. Warnings name optional values that were dropped.
    Valid { record: PhotoRecord, warnings: Vec<String> },
    /// The row is excluded from the batch.
    Invalid(Vec<String>),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    TargetPath,
    Latitude,
    Longitude,
    Rating,
    Category,
    Subcategory,
    Keywords,
    Description,
    Contacts,
    Email,
    Url,
    City,
    Country,
    Postcode,
    Address,
    Caption,
    CaptionText,
}

/// Fold a header to its lookup form: trimmed, lowercase, `_` for spaces and hyphens.
fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

fn column_for(header: &str) -> Option<Column> {
    let column = match normalize_header(header).as_str() {
        "target_path" | "path" | "file" | "путь" => Column::TargetPath,
        "latitude" | "lat" | "широта" => Column::Latitude,
        "longitude" | "lon" | "lng" | "долгота" => Column::Longitude,
        "rating" => Column::Rating,
        "category" => Column::Category,
        "subcategory" | "sub_category" => Column::Subcategory,
        "keywords" => Column::Keywords,
        "description" => Column::Description,
        "contacts" | "contact" => Column::Contacts,
        "email" | "e_mail" => Column::Email,
        "url" | "website" => Column::Url,
        "city" => Column::City,
        "country" => Column::Country,
        "postcode" | "postal_code" | "zip" => Column::Postcode,
        "address" => Column::Address,
        "caption" => Column::Caption,
        "caption_text" => Column::CaptionText,
        _ => return None,
    };
    Some(column)
}

/// Parse a coordinate cell. A decimal comma is accepted when no dot is present.
fn parse_coordinate(raw: &str) -> Option<f64> {
    let text = if raw.contains('.') {
        raw.to_string()
    } else {
        raw.replace(',', ".")
    };
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Validate a raw row and resolve it into a [`PhotoRecord`].
///
/// Missing required fields and bad coordinates make the row invalid; all
/// such problems are reported together. A malformed email or rating only
/// produces a warning and the value is dropped. The row itself is never
/// modified.
pub fn validate(row: &RawRow) -> Verdict {
    let mut cells: HashMap<Column, &str> = HashMap::new();
    let mut extra = BTreeMap::new();
    for (header, value) in row {
        match column_for(header) {
            Some(column) => {
                let value = value.trim();
                if !value.is_empty() {
                    cells.entry(column).or_insert(value);
                }
            }
            None => {
                extra.insert(header.clone(), value.clone());
            }
        }
    }

    let mut reasons = Vec::new();
    for (column, name) in [
        (Column::TargetPath, "target_path"),
        (Column::Latitude, "latitude"),
        (Column::Longitude, "longitude"),
    ] {
        if !cells.contains_key(&column) {
            reasons.push(format!("missing required field: {name}"));
        }
    }

    let latitude = coordinate(&cells, Column::Latitude, "latitude", 90.0, &mut reasons);
    let longitude = coordinate(&cells, Column::Longitude, "longitude", 180.0, &mut reasons);

    let (Some(target_path), Some(latitude), Some(longitude), true) =
        (cells.get(&Column::TargetPath), latitude, longitude, reasons.is_empty())
    else {
        return Verdict::Invalid(reasons);
    };

    let mut warnings = Vec::new();
    let text = |column: Column| cells.get(&column).map(|v| v.to_string());

    let email = text(Column::Email).filter(|email| {
        let ok = EMAIL_RE.is_match(email);
        if !ok {
            warnings.push(format!("invalid email {email:?}, ignoring it"));
        }
        ok
    });

    let rating = cells.get(&Column::Rating).and_then(|raw| match raw.parse::<u8>() {
        Ok(r) if r <= 5 => Some(r),
        _ => {
            warnings.push(format!("invalid rating {raw:?} (expected 0-5), ignoring it"));
            None
        }
    });

    let keywords = cells
        .get(&Column::Keywords)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let record = PhotoRecord {
        target_path: PathBuf::from(target_path),
        latitude,
        longitude,
        rating,
        category: text(Column::Category),
        subcategory: text(Column::Subcategory),
        keywords,
        description: text(Column::Description),
        contacts: text(Column::Contacts),
        email,
        url: text(Column::Url),
        city: text(Column::City),
        country: text(Column::Country),
        postcode: text(Column::Postcode),
        address: text(Column::Address),
        caption: text(Column::Caption),
        caption_text: text(Column::CaptionText),
        extra,
    };

    Verdict::Valid { record, warnings }
}

fn coordinate(
    cells: &HashMap<Column, &str>,
    column: Column,
    name: &str,
    limit: f64,
    reasons: &mut Vec<String>,
) -> Option<f64> {
    let raw = cells.get(&column)?;
    let Some(value) = parse_coordinate(raw) else {
        reasons.push(format!("{name} {raw:?} is not a number"));
        return None;
    };
    if !(-limit..=limit).contains(&value) {
        reasons.push(format!("{name} {value} out of range [-{limit}, {limit}]"));
        return None;
    }
    Some(value)
}
