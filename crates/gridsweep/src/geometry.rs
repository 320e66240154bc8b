//! Distance and unit conversions on the WGS84 sphere approximation.
//!
//! Everything here is a pure function. The meter/degree conversions are the linear
//! approximations the grid generators are built on; they are accurate enough for
//! city-scale areas and deliberately not used for distance checks, which always go
//! through [`haversine_distance_m`].

use gridsweep_places::{Bounds, LatLng};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Length of one degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Coordinates are stored and compared at this many decimal places (~0.1 m).
pub const COORD_DECIMALS: i32 = 6;

// cos(89.99994°); keeps the longitude conversion finite at the poles.
const MIN_COS_LATITUDE: f64 = 1e-6;

/// Great-circle distance between two points in meters.
pub fn haversine_distance_m(a: LatLng, b: LatLng) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

pub fn meters_to_lat_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Meters to degrees of longitude at `at_latitude`, shrinking with cos(latitude).
pub fn meters_to_lng_degrees(meters: f64, at_latitude: f64) -> f64 {
    let cos_lat = at_latitude.to_radians().cos().abs().max(MIN_COS_LATITUDE);
    meters / (METERS_PER_DEGREE * cos_lat)
}

/// Round a coordinate component to [`COORD_DECIMALS`] places.
pub fn round_coord(value: f64) -> f64 {
    let scale = 10f64.powi(COORD_DECIMALS);
    (value * scale).round() / scale
}

pub fn round_lat_lng(point: LatLng) -> LatLng {
    LatLng::new(round_coord(point.lat), round_coord(point.lng))
}

/// Distance from the center of `bounds` to its farthest corner.
pub fn max_distance_from_center(bounds: &Bounds) -> f64 {
    let center = bounds.center();
    bounds
        .corners()
        .into_iter()
        .map(|corner| haversine_distance_m(center, corner))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_and_symmetry() {
        let a = LatLng::new(52.52, 13.405);
        let b = LatLng::new(52.5163, 13.3777);
        assert_eq!(haversine_distance_m(a, a), 0.0);
        let ab = haversine_distance_m(a, b);
        let ba = haversine_distance_m(b, a);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_known_distances() {
        // One degree of latitude along a meridian: R * pi / 180.
        let d = haversine_distance_m(LatLng::new(0.0, 0.0), LatLng::new(1.0, 0.0));
        let expected = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        assert!((d - expected).abs() < 1e-6, "got {d}, expected {expected}");

        // Alexanderplatz to Brandenburger Tor is a little under 2.5 km.
        let d = haversine_distance_m(
            LatLng::new(52.521918, 13.413215),
            LatLng::new(52.516275, 13.377704),
        );
        assert!((2_450.0..2_500.0).contains(&d), "got {d}");
    }

    #[test]
    fn test_sub_meter_precision_over_short_hops() {
        let origin = LatLng::new(52.51, 13.35);
        let north = LatLng::new(52.51 + meters_to_lat_degrees(500.0), 13.35);
        let d = haversine_distance_m(origin, north);
        // The linear conversion uses 111 320 m/deg while the sphere gives ~111 195 m/deg.
        let expected = 500.0 * (EARTH_RADIUS_M * std::f64::consts::PI / 180.0) / METERS_PER_DEGREE;
        assert!((d - expected).abs() < 0.01, "got {d}, expected {expected}");
    }

    #[test]
    fn test_lng_degrees_grow_with_latitude() {
        let at_equator = meters_to_lng_degrees(1000.0, 0.0);
        let at_berlin = meters_to_lng_degrees(1000.0, 52.5);
        assert!((at_equator - meters_to_lat_degrees(1000.0)).abs() < 1e-12);
        assert!(at_berlin > at_equator);
        assert!((at_berlin - at_equator / 52.5f64.to_radians().cos()).abs() < 1e-12);
    }

    #[test]
    fn test_lng_degrees_at_poles_stay_finite() {
        for lat in [90.0, -90.0, 89.999_999_9] {
            let deg = meters_to_lng_degrees(750.0, lat);
            assert!(deg.is_finite() && deg > 0.0, "lat {lat} gave {deg}");
        }
    }

    #[test]
    fn test_round_coord() {
        assert_eq!(round_coord(52.123_456_7), 52.123_457);
        assert_eq!(round_coord(-13.000_000_4), -13.0);
        assert_eq!(
            round_lat_lng(LatLng::new(1.000_000_49, 2.999_999_7)),
            LatLng::new(1.0, 3.0)
        );
    }

    #[test]
    fn test_max_distance_from_center() {
        let bounds = Bounds::new(52.51, 13.35, 52.52, 13.36);
        let d = max_distance_from_center(&bounds);
        // Half-diagonal of a ~1.1 km x ~0.68 km box.
        assert!((600.0..700.0).contains(&d), "got {d}");

        let point = Bounds::new(1.0, 1.0, 1.0, 1.0);
        assert_eq!(max_distance_from_center(&point), 0.0);
    }
}
