//! Coordinate conversion and reverse geocoding.
//!
//! - [`codec`] — decimal degrees ⇄ EXIF sexagesimal rationals, hemisphere references
//! - [`geocoder`] — reverse-geocoding trait, Nominatim client, retrying cached lookup

pub mod codec;
pub mod geocoder;

pub use codec::{
    Axis, GpsFields, Rational, Sexagesimal, from_sexagesimal, hemisphere_ref, in_range,
    to_gps_fields, to_sexagesimal,
};
pub use geocoder::{GeoCache, GeocodeError, LocationLookup, NominatimGeocoder, Place, ReverseGeocoder};
