//! Great-circle distance for geofence evaluation.

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters between two lat/lng points (degrees).
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlam = (lng2 - lng1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlam / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_to_self() {
        assert_eq!(haversine_m(48.8566, 2.3522, 48.8566, 2.3522), 0.0);
    }

    #[test]
    fn symmetric() {
        let d1 = haversine_m(48.8566, 2.3522, 51.5074, -0.1278);
        let d2 = haversine_m(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d1 - d2).abs() < 1e-6);
    }

    #[test]
    fn non_negative() {
        let d = haversine_m(-33.8688, 151.2093, 40.7128, -74.0060);
        assert!(d > 0.0);
    }

    #[test]
    fn paris_to_london_about_344_km() {
        let d = haversine_m(48.8566, 2.3522, 51.5074, -0.1278);
        assert!((d - 344_000.0).abs() < 2_000.0, "got {d}");
    }

    #[test]
    fn short_distance_accuracy() {
        // ~111.32 m per 0.001 degree of latitude.
        let d = haversine_m(52.0, 13.0, 52.001, 13.0);
        assert!((d - 111.3).abs() < 0.5, "got {d}");
    }
}
