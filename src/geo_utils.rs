//! # Geographic Utilities
//!
//! Distance and projection helpers used by the track simplifier.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two points |
//! | [`polyline_length`] | Total length of a track in meters |
//! | [`LocalProjection`] | Equirectangular projection to local meters |
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).

use geo::{Coord, Distance, Haversine, Point};

/// Mean Earth radius used by the equirectangular projection, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters between two (latitude, longitude) pairs.
///
/// ```rust
/// use workout_sync::geo_utils::haversine_distance;
///
/// let london = (51.5074, -0.1278);
/// let paris = (48.8566, 2.3522);
/// let distance = haversine_distance(london, paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let p1 = Point::new(a.1, a.0);
    let p2 = Point::new(b.1, b.0);
    Haversine::distance(p1, p2)
}

/// Sum of haversine distances between consecutive points. Empty and
/// single-point tracks have length 0.
pub fn polyline_length(points: &[(f64, f64)]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(w[0], w[1]))
        .sum()
}

/// Equirectangular projection centred on a reference latitude.
///
/// Distortion stays well under GPS noise for the extent of a single workout,
/// which lets planar Douglas-Peucker run with a tolerance in meters.
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    cos_lat: f64,
}

impl LocalProjection {
    /// Projection centred on the mean latitude of `points`.
    pub fn for_points(points: &[(f64, f64)]) -> Self {
        if points.is_empty() {
            return Self::new(0.0);
        }
        let mean_lat = points.iter().map(|p| p.0).sum::<f64>() / points.len() as f64;
        Self::new(mean_lat)
    }

    pub fn new(reference_lat: f64) -> Self {
        Self {
            cos_lat: reference_lat.to_radians().cos(),
        }
    }

    /// Project a (latitude, longitude) pair to planar meters.
    #[inline]
    pub fn project(&self, lat: f64, lon: f64) -> Coord<f64> {
        Coord {
            x: EARTH_RADIUS_M * lon.to_radians() * self.cos_lat,
            y: EARTH_RADIUS_M * lat.to_radians(),
        }
    }
}
