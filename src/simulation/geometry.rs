//! Geographic distance calculations.
//!
//! Sensors and the gateway are placed by latitude/longitude. Distances are
//! great-circle distances on a spherical Earth, which is accurate to well under
//! a percent at city scale and far below the shadowing noise of the channel.

use serde::Deserialize;

/// Mean Earth radius used by the haversine formula (meters).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Latitude within ±90 and longitude within ±180, both finite.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite() && self.latitude.abs() <= 90.0 && self.longitude.abs() <= 180.0
    }
}

/// Great-circle distance between two points in meters.
///
/// # Formula
///
/// ```text
/// a = sin²(Δφ/2) + cos φ₁ · cos φ₂ · sin²(Δλ/2)
/// d = 2R · atan2(√a, √(1−a))
/// ```
///
/// Symmetric in its arguments and exactly zero for identical points.
pub fn distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    distance_between(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// [`distance`] on raw coordinates.
pub fn distance_between(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let phi1 = lat_a.to_radians();
    let phi2 = lat_b.to_radians();
    let delta_phi = (lat_b - lat_a).to_radians();
    let delta_lambda = (lon_b - lon_a).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        let p = GeoPoint::new(23.8103, 90.4125);
        assert_eq!(distance(&p, &p), 0.0);
        let q = GeoPoint::new(-33.86, 151.21);
        assert_eq!(distance(&q, &q), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint::new(23.8170, 90.4270);
        let b = GeoPoint::new(23.7100, 90.4000);
        assert!((distance(&a, &b) - distance(&b, &a)).abs() < 1e-9);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = distance_between(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 50.0, "got {d}");
    }

    #[test]
    fn dhaka_areas_are_kilometers_apart() {
        // Uttara to Wari, roughly 18.5 km north to south.
        let d = distance_between(23.8750, 90.3900, 23.7100, 90.4000);
        assert!(d > 18_000.0 && d < 19_000.0, "got {d}");
    }

    #[test]
    fn validity_checks_ranges() {
        assert!(GeoPoint::new(23.8, 90.4).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::NAN).is_valid());
    }
}
