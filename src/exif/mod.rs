//! EXIF metadata block handling for JPEG files.
//!
//! - [`block`] — [`MetadataBlock`], a section-aware TIFF/IFD codec that keeps untouched entries byte-for-byte
//! - [`writer`] — [`apply_tags`], merges a photo record's GPS and descriptive fields into a file
//! - [`read_exif`] — reads geotag fields back with nom-exif, for display and verification

pub mod block;
pub mod writer;
mod reader;

pub use block::{BlockError, ByteOrder, Entry, Format, Ifd, MetadataBlock, Section, Value};
pub use reader::{ExifData, read_exif};
pub use writer::{MergeReport, apply_tags, merge_record};
