use serde::{Deserialize, Serialize};

/// Mean Earth radius used for all surface distances.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn distance_to(&self, other: &LatLon) -> f64 {
        haversine_distance(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Great-circle distance in meters between two points given in degrees.
///
/// Uses the arcsine form, which stays accurate for the sub-meter separations
/// typical of raw vs. filtered fixes. `a` is clamped to `[0, 1]` so rounding
/// can never push `asin` out of its domain.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_haversine_distance() {
        let dist = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn identical_points_are_zero() {
        assert_eq!(haversine_distance(48.2082, 16.3738, 48.2082, 16.3738), 0.0);
        assert_eq!(haversine_distance(-90.0, 180.0, -90.0, 180.0), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let vienna = LatLon::new(48.2082, 16.3738);
        let graz = LatLon::new(47.0707, 15.4395);
        let there = vienna.distance_to(&graz);
        let back = graz.distance_to(&vienna);
        assert!((there - back).abs() < 1e-6);
        assert!((there - 145_000.0).abs() < 5_000.0, "got {}", there);
    }

    #[test]
    fn antipodes_are_bounded_by_half_circumference() {
        let max = PI * EARTH_RADIUS_M;
        let d = haversine_distance(0.0, 0.0, 0.0, 180.0);
        assert!(d <= max + 1e-6);
        assert!((d - max).abs() < 1.0);
        let pole = haversine_distance(90.0, 0.0, -90.0, 0.0);
        assert!(pole <= max + 1e-6);
    }

    #[test]
    fn tiny_separations_stay_positive() {
        // ~1 cm apart
        let d = haversine_distance(48.2082, 16.3738, 48.20820009, 16.3738);
        assert!(d > 0.0 && d < 0.05, "got {}", d);
    }
}
