//! Distance between a subscriber and a store.

use crate::types::{Store, Subscriber};

/// Mean Earth radius in statute miles.
const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Computes how far a store is from a subscriber, in miles.
pub trait DistanceCalculator: Send + Sync {
    fn miles_between(&self, subscriber: &Subscriber, store: &Store) -> f64;
}

/// Great-circle distance over a spherical Earth.
#[derive(Debug, Clone, Copy, Default)]
pub struct Haversine;

impl Haversine {
    pub fn miles(from: (f64, f64), to: (f64, f64)) -> f64 {
        let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
        let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());

        let d_lat = lat2 - lat1;
        let d_lon = lon2 - lon1;
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

        2.0 * EARTH_RADIUS_MILES * a.sqrt().asin()
    }
}

impl DistanceCalculator for Haversine {
    fn miles_between(&self, subscriber: &Subscriber, store: &Store) -> f64 {
        Self::miles(
            (subscriber.latitude, subscriber.longitude),
            (store.latitude, store.longitude),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        assert_eq!(Haversine::miles((40.0, -75.0), (40.0, -75.0)), 0.0);
    }

    #[test]
    fn test_known_distance() {
        // Philadelphia City Hall to the Liberty Bell, roughly 0.7 miles.
        let d = Haversine::miles((39.9526, -75.1635), (39.9496, -75.1503));
        assert!((d - 0.73).abs() < 0.1, "got {d}");
    }

    #[test]
    fn test_one_degree_latitude() {
        let d = Haversine::miles((0.0, 0.0), (1.0, 0.0));
        assert!((d - 69.09).abs() < 0.1, "got {d}");
    }
}
