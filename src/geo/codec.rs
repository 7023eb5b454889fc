/// An unsigned EXIF rational as `(numerator, denominator)`.
pub type Rational = (u32, u32);

/// Degrees, minutes, seconds — the three rationals of an EXIF GPS coordinate.
pub type Sexagesimal = [Rational; 3];

/// Denominator used for the seconds component (two decimal digits).
pub const SECONDS_DENOMINATOR: u32 = 100;

/// Which coordinate a hemisphere reference is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Latitude,
    Longitude,
}

/// GPS fields ready to be written into the GPS section of a metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpsFields {
    pub latitude_ref: char,
    pub latitude: Sexagesimal,
    pub longitude_ref: char,
    pub longitude: Sexagesimal,
}

/// Split a non-negative decimal degree value into degrees, minutes, and seconds.
///
/// Degrees and minutes are truncated, not rounded. Seconds keep two decimal
/// digits and are encoded as `(seconds * 100, 100)`, also truncated, so the
/// reassembled value is never larger than the input and differs from it by
/// less than `1 / 360000` of a degree.
pub fn to_sexagesimal(decimal: f64) -> Sexagesimal {
    let degrees = decimal.trunc();
    let minutes_decimal = (decimal - degrees) * 60.0;
    let minutes = minutes_decimal.trunc();
    let seconds = (minutes_decimal - minutes) * 60.0;

    [
        (degrees as u32, 1),
        (minutes as u32, 1),
        ((seconds * f64::from(SECONDS_DENOMINATOR)) as u32, SECONDS_DENOMINATOR),
    ]
}

/// Reassemble a sexagesimal coordinate into decimal degrees.
pub fn from_sexagesimal(value: &Sexagesimal) -> f64 {
    let part = |(num, den): Rational| {
        if den == 0 {
            0.0
        } else {
            f64::from(num) / f64::from(den)
        }
    };
    part(value[0]) + part(value[1]) / 60.0 + part(value[2]) / 3600.0
}

/// Hemisphere reference letter for a signed coordinate. Zero is positive.
pub fn hemisphere_ref(value: f64, axis: Axis) -> char {
    match (axis, value >= 0.0) {
        (Axis::Latitude, true) => 'N',
        (Axis::Latitude, false) => 'S',
        (Axis::Longitude, true) => 'E',
        (Axis::Longitude, false) => 'W',
    }
}

/// Convert a `(lat, lon)` pair into EXIF GPS fields.
///
/// Never fails; callers range-check the coordinates beforehand.
pub fn to_gps_fields(latitude: f64, longitude: f64) -> GpsFields {
    GpsFields {
        latitude_ref: hemisphere_ref(latitude, Axis::Latitude),
        latitude: to_sexagesimal(latitude.abs()),
        longitude_ref: hemisphere_ref(longitude, Axis::Longitude),
        longitude: to_sexagesimal(longitude.abs()),
    }
}

/// Check that a latitude lies in `[-90, 90]` and a longitude in `[-180, 180]`.
pub fn in_range(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_ERROR: f64 = 1.0 / 360_000.0 + 1e-9;

    // ── to_sexagesimal ───────────────────────────────────────────────

    #[test]
    fn splits_moscow_latitude() {
        let dms = to_sexagesimal(55.7558);
        assert_eq!(dms[0], (55, 1));
        assert_eq!(dms[1], (45, 1));
        assert_eq!(dms[2].1, 100);
        // 20.88" before truncation; float noise may land one hundredth below
        assert!((2087..=2088).contains(&dms[2].0), "seconds = {:?}", dms[2]);
    }

    #[test]
    fn whole_degrees_have_zero_minutes_and_seconds() {
        assert_eq!(to_sexagesimal(90.0), [(90, 1), (0, 1), (0, 100)]);
        assert_eq!(to_sexagesimal(0.0), [(0, 1), (0, 1), (0, 100)]);
        assert_eq!(to_sexagesimal(180.0), [(180, 1), (0, 1), (0, 100)]);
    }

    #[test]
    fn reassembly_stays_within_truncation_error() {
        let mut d = 0.0;
        while d < 180.0 {
            let back = from_sexagesimal(&to_sexagesimal(d));
            let err = d - back;
            assert!(err >= -1e-9, "reassembled {back} exceeds input {d}");
            assert!(err <= MAX_ERROR, "error {err} too large for {d}");
            d += 0.123_457;
        }
    }

    #[test]
    fn truncates_instead_of_rounding() {
        // 10.999999° is 10° 59' 59.9964"; rounding would carry into 11°
        let dms = to_sexagesimal(10.999_999);
        assert_eq!(dms[0], (10, 1));
        assert_eq!(dms[1], (59, 1));
        assert_eq!(dms[2], (5999, 100));
    }

    // ── hemisphere_ref ───────────────────────────────────────────────

    #[test]
    fn hemisphere_refs_follow_sign() {
        assert_eq!(hemisphere_ref(12.5, Axis::Latitude), 'N');
        assert_eq!(hemisphere_ref(-12.5, Axis::Latitude), 'S');
        assert_eq!(hemisphere_ref(12.5, Axis::Longitude), 'E');
        assert_eq!(hemisphere_ref(-12.5, Axis::Longitude), 'W');
    }

    #[test]
    fn zero_is_positive_hemisphere() {
        assert_eq!(hemisphere_ref(0.0, Axis::Latitude), 'N');
        assert_eq!(hemisphere_ref(0.0, Axis::Longitude), 'E');
    }

    // ── to_gps_fields ────────────────────────────────────────────────

    #[test]
    fn gps_fields_use_absolute_values() {
        let gps = to_gps_fields(-33.8688, -151.2093);
        assert_eq!(gps.latitude_ref, 'S');
        assert_eq!(gps.longitude_ref, 'W');
        assert_eq!(gps.latitude[0], (33, 1));
        assert_eq!(gps.longitude[0], (151, 1));
        assert!((from_sexagesimal(&gps.latitude) - 33.8688).abs() <= MAX_ERROR);
        assert!((from_sexagesimal(&gps.longitude) - 151.2093).abs() <= MAX_ERROR);
    }

    #[test]
    fn range_check_includes_boundaries() {
        assert!(in_range(90.0, 180.0));
        assert!(in_range(-90.0, -180.0));
        assert!(!in_range(90.0001, 0.0));
        assert!(!in_range(0.0, -180.0001));
        assert!(!in_range(f64::NAN, 0.0));
    }
}
