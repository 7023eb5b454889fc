//! Section-level view of an EXIF block.
//!
//! Decoding and encoding of the TIFF structure go through kamadak-exif; this
//! module keeps every entry as raw value bytes grouped by section, so merging
//! a field never disturbs the others.

use std::collections::BTreeMap;
use std::io::Cursor;

use ::exif as kexif;
use kexif::experimental::Writer;
use kexif::{Context, Field, In, Reader, Tag};

use crate::geo::Rational;

// IFD1 thumbnail location
pub const TAG_THUMBNAIL_OFFSET: u16 = 0x0201;
pub const TAG_THUMBNAIL_LENGTH: u16 = 0x0202;

/// Failure to decode or encode a metadata block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("unreadable EXIF data: {0}")]
    Decode(String),
    #[error("failed to encode EXIF data: {0}")]
    Encode(String),
    #[error("text value contains a NUL byte")]
    InvalidText,
    #[error("value or block too large ({0})")]
    TooLarge(usize),
}

/// TIFF byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn read_u16(self, b: [u8; 2]) -> u16 {
        match self {
            Self::Little => u16::from_le_bytes(b),
            Self::Big => u16::from_be_bytes(b),
        }
    }

    fn read_u32(self, b: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(b),
            Self::Big => u32::from_be_bytes(b),
        }
    }

    fn read_u64(self, b: [u8; 8]) -> u64 {
        match self {
            Self::Little => u64::from_le_bytes(b),
            Self::Big => u64::from_be_bytes(b),
        }
    }

    fn encode_u16(self, v: u16) -> [u8; 2] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    fn encode_u32(self, v: u32) -> [u8; 4] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    fn encode_u64(self, v: u64) -> [u8; 8] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    fn encode_pair(self, num: u32, den: u32) -> [u8; 8] {
        let mut pair = [0u8; 8];
        pair[..4].copy_from_slice(&self.encode_u32(num));
        pair[4..].copy_from_slice(&self.encode_u32(den));
        pair
    }

    fn u16s(self, data: &[u8]) -> impl Iterator<Item = u16> + '_ {
        data.chunks_exact(2).map(move |c| self.read_u16([c[0], c[1]]))
    }

    fn u32s(self, data: &[u8]) -> impl Iterator<Item = u32> + '_ {
        data.chunks_exact(4).map(move |c| self.read_u32([c[0], c[1], c[2], c[3]]))
    }

    fn u64s(self, data: &[u8]) -> impl Iterator<Item = u64> + '_ {
        data.chunks_exact(8)
            .map(move |c| self.read_u64([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
    }
}

/// Named sections of a metadata block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    /// IFD0 — image-level tags.
    Image,
    /// Exif sub-IFD — exposure and capture tags.
    Exif,
    /// Interoperability sub-IFD, hanging off the Exif section.
    Interop,
    /// GPS sub-IFD.
    Gps,
    /// IFD1 — thumbnail tags.
    Thumbnail,
}

impl Section {
    fn location(self) -> (Context, In) {
        match self {
            Self::Image => (Context::Tiff, In::PRIMARY),
            Self::Exif => (Context::Exif, In::PRIMARY),
            Self::Interop => (Context::Interop, In::PRIMARY),
            Self::Gps => (Context::Gps, In::PRIMARY),
            Self::Thumbnail => (Context::Tiff, In::THUMBNAIL),
        }
    }

    fn of(field: &Field) -> Option<Self> {
        let primary = field.ifd_num == In::PRIMARY;
        let section = match field.tag.context() {
            Context::Tiff if primary => Self::Image,
            Context::Tiff if field.ifd_num == In::THUMBNAIL => Self::Thumbnail,
            Context::Exif if primary => Self::Exif,
            Context::Interop if primary => Self::Interop,
            Context::Gps if primary => Self::Gps,
            _ => return None,
        };
        Some(section)
    }
}

/// TIFF entry data formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    SByte = 6,
    Undefined = 7,
    SShort = 8,
    SLong = 9,
    SRational = 10,
    Float = 11,
    Double = 12,
}

impl Format {
    pub fn unit_size(self) -> usize {
        match self {
            Self::Byte | Self::Ascii | Self::SByte | Self::Undefined => 1,
            Self::Short | Self::SShort => 2,
            Self::Long | Self::SLong | Self::Float => 4,
            Self::Rational | Self::SRational | Self::Double => 8,
        }
    }
}

/// One IFD entry. `data` holds the raw value bytes in the block's byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub format: Format,
    pub count: u32,
    pub data: Vec<u8>,
}

impl Entry {
    fn from_data(format: Format, data: Vec<u8>) -> Result<Self, BlockError> {
        let count = data.len() / format.unit_size();
        let count = u32::try_from(count).map_err(|_| BlockError::TooLarge(count))?;
        Ok(Self { format, count, data })
    }

    /// Convert a decoded kamadak-exif value. Unknown types yield `None`.
    fn from_exif(value: &kexif::Value, order: ByteOrder) -> Option<Self> {
        use kexif::Value as V;
        let (format, data): (Format, Vec<u8>) = match value {
            V::Byte(v) => (Format::Byte, v.clone()),
            V::Ascii(parts) => (
                Format::Ascii,
                parts.iter().flat_map(|p| p.iter().copied().chain([0])).collect(),
            ),
            V::Short(v) => (Format::Short, v.iter().flat_map(|x| order.encode_u16(*x)).collect()),
            V::Long(v) => (Format::Long, v.iter().flat_map(|x| order.encode_u32(*x)).collect()),
            V::Rational(v) => (
                Format::Rational,
                v.iter().flat_map(|r| order.encode_pair(r.num, r.denom)).collect(),
            ),
            V::SByte(v) => (Format::SByte, v.iter().map(|x| *x as u8).collect()),
            V::Undefined(v, _) => (Format::Undefined, v.clone()),
            V::SShort(v) => (Format::SShort, v.iter().flat_map(|x| order.encode_u16(*x as u16)).collect()),
            V::SLong(v) => (Format::SLong, v.iter().flat_map(|x| order.encode_u32(*x as u32)).collect()),
            V::SRational(v) => (
                Format::SRational,
                v.iter()
                    .flat_map(|r| order.encode_pair(r.num as u32, r.denom as u32))
                    .collect(),
            ),
            V::Float(v) => (Format::Float, v.iter().flat_map(|x| order.encode_u32(x.to_bits())).collect()),
            V::Double(v) => (Format::Double, v.iter().flat_map(|x| order.encode_u64(x.to_bits())).collect()),
            _ => return None,
        };
        Self::from_data(format, data).ok()
    }

    fn to_exif(&self, order: ByteOrder) -> kexif::Value {
        use kexif::Value as V;
        let d = &self.data;
        match self.format {
            Format::Byte => V::Byte(d.clone()),
            Format::Ascii => V::Ascii(split_ascii(d)),
            Format::Short => V::Short(order.u16s(d).collect()),
            Format::Long => V::Long(order.u32s(d).collect()),
            Format::Rational => V::Rational(
                order
                    .u32s(d)
                    .collect::<Vec<_>>()
                    .chunks_exact(2)
                    .map(|p| kexif::Rational { num: p[0], denom: p[1] })
                    .collect(),
            ),
            Format::SByte => V::SByte(d.iter().map(|x| *x as i8).collect()),
            Format::Undefined => V::Undefined(d.clone(), 0),
            Format::SShort => V::SShort(order.u16s(d).map(|x| x as i16).collect()),
            Format::SLong => V::SLong(order.u32s(d).map(|x| x as i32).collect()),
            Format::SRational => V::SRational(
                order
                    .u32s(d)
                    .collect::<Vec<_>>()
                    .chunks_exact(2)
                    .map(|p| kexif::SRational {
                        num: p[0] as i32,
                        denom: p[1] as i32,
                    })
                    .collect(),
            ),
            Format::Float => V::Float(order.u32s(d).map(f32::from_bits).collect()),
            Format::Double => V::Double(order.u64s(d).map(f64::from_bits).collect()),
        }
    }

    /// Single SHORT/LONG value.
    fn scalar(&self, order: ByteOrder) -> Option<usize> {
        if self.count != 1 {
            return None;
        }
        match self.format {
            Format::Short => order.u16s(&self.data).next().map(usize::from),
            Format::Long => order.u32s(&self.data).next().map(|v| v as usize),
            _ => None,
        }
    }
}

/// NUL-terminated strings of an ASCII value.
fn split_ascii(data: &[u8]) -> Vec<Vec<u8>> {
    let mut parts: Vec<Vec<u8>> = data.split(|&b| b == 0).map(<[u8]>::to_vec).collect();
    if data.is_empty() || data.last() == Some(&0) {
        parts.pop();
    }
    parts
}

/// Entries of one section, keyed (and therefore written) in ascending tag order.
pub type Ifd = BTreeMap<u16, Entry>;

/// A typed value to store into a section.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(Vec<u8>),
    /// NUL-terminated text. The bytes are UTF-8.
    Ascii(String),
    /// UTF-16LE text in a BYTE entry, as used by the Windows XP* tags.
    Utf16(String),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Rational(Vec<Rational>),
}

impl Value {
    fn encode(&self, order: ByteOrder) -> Result<Entry, BlockError> {
        let (format, data) = match self {
            Value::Byte(bytes) => (Format::Byte, bytes.clone()),
            Value::Ascii(text) => {
                if text.contains('\0') {
                    return Err(BlockError::InvalidText);
                }
                let mut data = text.as_bytes().to_vec();
                data.push(0);
                (Format::Ascii, data)
            }
            Value::Utf16(text) => {
                let mut data: Vec<u8> = text.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
                data.extend_from_slice(&[0, 0]);
                (Format::Byte, data)
            }
            Value::Short(values) => (
                Format::Short,
                values.iter().flat_map(|v| order.encode_u16(*v)).collect(),
            ),
            Value::Long(values) => (
                Format::Long,
                values.iter().flat_map(|v| order.encode_u32(*v)).collect(),
            ),
            Value::Rational(values) => (
                Format::Rational,
                values.iter().flat_map(|(num, den)| order.encode_pair(*num, *den)).collect(),
            ),
        };
        Entry::from_data(format, data)
    }
}

/// In-memory metadata container: the TIFF structure inside a JPEG APP1 segment.
///
/// Entries of every section are kept as raw bytes, so anything this crate
/// does not touch is written back with the same values. Offsets are
/// recomputed on every [`to_tiff`](Self::to_tiff); data that stores absolute
/// offsets inside an opaque value (maker notes) is not relocated.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataBlock {
    byte_order: ByteOrder,
    sections: BTreeMap<Section, Ifd>,
    thumbnail: Option<Vec<u8>>,
}

impl Default for MetadataBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataBlock {
    /// An empty block with the image, Exif, GPS, and thumbnail sections present.
    pub fn new() -> Self {
        let sections = [Section::Image, Section::Exif, Section::Gps, Section::Thumbnail]
            .into_iter()
            .map(|s| (s, Ifd::new()))
            .collect();
        Self {
            byte_order: ByteOrder::Big,
            sections,
            thumbnail: None,
        }
    }

    /// Decode TIFF data (the APP1 payload after `Exif\0\0`).
    ///
    /// Damage confined to part of the block (a dangling sub-IFD pointer, an
    /// entry of unknown type) drops only that part. An error is returned only
    /// when nothing can be read.
    pub fn from_tiff(data: &[u8]) -> Result<Self, BlockError> {
        let mut reader = Reader::new();
        reader.continue_on_error(true);
        let exif = match reader.read_raw(data.to_vec()) {
            Ok(exif) => exif,
            Err(kexif::Error::PartialResult(partial)) => {
                let (exif, errors) = partial.into_inner();
                for e in &errors {
                    log::warn!("Skipped damaged EXIF data: {e}");
                }
                exif
            }
            Err(e) => return Err(BlockError::Decode(e.to_string())),
        };
        let byte_order = if exif.little_endian() {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        };

        let mut sections = BTreeMap::new();
        sections.insert(Section::Image, Ifd::new());
        for field in exif.fields() {
            if is_pointer(field.tag) {
                continue;
            }
            let Some(section) = Section::of(field) else {
                log::debug!("Dropped {} in {:?}", field.tag, field.ifd_num);
                continue;
            };
            match Entry::from_exif(&field.value, byte_order) {
                Some(entry) => {
                    sections.entry(section).or_insert_with(Ifd::new).insert(field.tag.number(), entry);
                }
                None => log::warn!("Dropped {} with an unknown value type", field.tag),
            }
        }

        let thumbnail = sections
            .get_mut(&Section::Thumbnail)
            .and_then(|ifd1| take_thumbnail(ifd1, data, byte_order));

        Ok(Self {
            byte_order,
            sections,
            thumbnail,
        })
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn has_section(&self, section: Section) -> bool {
        self.sections.contains_key(&section)
    }

    pub fn section(&self, section: Section) -> Option<&Ifd> {
        self.sections.get(&section)
    }

    /// Get a section, creating it empty when absent.
    pub fn ensure_section(&mut self, section: Section) -> &mut Ifd {
        self.sections.entry(section).or_default()
    }

    pub fn get(&self, section: Section, tag: u16) -> Option<&Entry> {
        self.sections.get(&section)?.get(&tag)
    }

    /// Encode `value` in this block's byte order and store it, replacing any previous entry.
    pub fn set(&mut self, section: Section, tag: u16, value: Value) -> Result<(), BlockError> {
        let entry = value.encode(self.byte_order)?;
        self.ensure_section(section).insert(tag, entry);
        Ok(())
    }

    pub fn thumbnail(&self) -> Option<&[u8]> {
        self.thumbnail.as_deref()
    }

    pub fn set_thumbnail(&mut self, data: Option<Vec<u8>>) {
        self.thumbnail = data;
    }

    /// Text of an ASCII entry, without the trailing NULs.
    pub fn text(&self, section: Section, tag: u16) -> Option<String> {
        let entry = self.get(section, tag).filter(|e| e.format == Format::Ascii)?;
        let end = entry.data.iter().position(|&b| b == 0).unwrap_or(entry.data.len());
        Some(String::from_utf8_lossy(&entry.data[..end]).into_owned())
    }

    /// Text of a UTF-16LE BYTE entry (XP* tags).
    pub fn utf16(&self, section: Section, tag: u16) -> Option<String> {
        let entry = self.get(section, tag).filter(|e| e.format == Format::Byte)?;
        Some(decode_utf16le(&entry.data))
    }

    pub fn shorts(&self, section: Section, tag: u16) -> Option<Vec<u16>> {
        let entry = self.get(section, tag).filter(|e| e.format == Format::Short)?;
        Some(self.byte_order.u16s(&entry.data).collect())
    }

    pub fn rationals(&self, section: Section, tag: u16) -> Option<Vec<Rational>> {
        let entry = self.get(section, tag).filter(|e| e.format == Format::Rational)?;
        let values: Vec<u32> = self.byte_order.u32s(&entry.data).collect();
        Some(values.chunks_exact(2).map(|p| (p[0], p[1])).collect())
    }

    /// Encode the block as TIFF data.
    ///
    /// Sub-IFD pointers and the thumbnail location are generated by the
    /// writer; empty sub-sections are left out.
    pub fn to_tiff(&self) -> Result<Vec<u8>, BlockError> {
        let fields: Vec<Field> = self
            .sections
            .iter()
            .flat_map(|(section, ifd)| {
                let (context, ifd_num) = section.location();
                ifd.iter().map(move |(tag, entry)| Field {
                    tag: Tag(context, *tag),
                    ifd_num,
                    value: entry.to_exif(self.byte_order),
                })
            })
            .collect();

        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        if let Some(data) = &self.thumbnail {
            writer.set_jpeg(data, In::THUMBNAIL);
        }

        let mut buf = Cursor::new(Vec::new());
        writer
            .write(&mut buf, self.byte_order == ByteOrder::Little)
            .map_err(|e| BlockError::Encode(e.to_string()))?;
        Ok(buf.into_inner())
    }
}

fn is_pointer(tag: Tag) -> bool {
    tag == Tag::ExifIFDPointer || tag == Tag::GPSInfoIFDPointer || tag == Tag::InteropIFDPointer
}

/// Cut the thumbnail image out of `data` and drop its location tags.
///
/// Tags are left alone unless both location tags are present.
fn take_thumbnail(ifd1: &mut Ifd, data: &[u8], order: ByteOrder) -> Option<Vec<u8>> {
    let offset = ifd1.get(&TAG_THUMBNAIL_OFFSET)?.scalar(order)?;
    let length = ifd1.get(&TAG_THUMBNAIL_LENGTH)?.scalar(order)?;
    ifd1.remove(&TAG_THUMBNAIL_OFFSET);
    ifd1.remove(&TAG_THUMBNAIL_LENGTH);

    let bytes = offset.checked_add(length).and_then(|end| data.get(offset..end));
    if bytes.is_none() {
        log::warn!("Thumbnail at {offset}+{length} lies outside the EXIF block, dropped");
    }
    bytes.map(<[u8]>::to_vec)
}

/// Decode UTF-16LE bytes up to the first NUL code unit.
pub fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
