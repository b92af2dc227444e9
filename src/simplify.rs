//! Track simplification.
//!
//! Douglas-Peucker over a local equirectangular projection so the tolerance
//! is a distance in meters rather than degrees. The simplifier works on
//! indices into the original track, which keeps every retained coordinate
//! bit-identical to its input (in particular the first and last points).

use geo::{LineString, SimplifyIdx};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{polyline_length, LocalProjection};
use crate::TrackPoint;

/// A simplified route ready to be written as a map artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplifiedGeometry {
    pub workout_id: String,
    pub workout_type: String,
    /// (latitude, longitude) pairs in track order
    pub coordinates: Vec<(f64, f64)>,
    /// Number of points before simplification
    pub original_points: usize,
}

impl SimplifiedGeometry {
    /// Length of the simplified line in meters.
    pub fn distance_m(&self) -> f64 {
        polyline_length(&self.coordinates)
    }
}

/// Reduce a track to the points needed to stay within `tolerance_m` meters of
/// the original line.
///
/// Tracks of up to two points are returned unchanged. A negative or
/// non-finite tolerance is treated as zero, which keeps every point.
///
/// # Example
/// ```
/// use workout_sync::{simplify, TrackPoint};
///
/// let track = vec![
///     TrackPoint::new(51.5000, -0.1200),
///     TrackPoint::new(51.5005, -0.1200),
///     TrackPoint::new(51.5010, -0.1200),
///     TrackPoint::new(51.5010, -0.1190),
/// ];
/// let geometry = simplify("1", "Walk", &track, 5.0);
/// assert_eq!(geometry.coordinates.len(), 3);
/// assert_eq!(geometry.coordinates[0], (51.5000, -0.1200));
/// ```
pub fn simplify(
    workout_id: &str,
    workout_type: &str,
    points: &[TrackPoint],
    tolerance_m: f64,
) -> SimplifiedGeometry {
    let lat_lon: Vec<(f64, f64)> = points.iter().map(TrackPoint::lat_lon).collect();

    let coordinates = if lat_lon.len() <= 2 {
        lat_lon
    } else {
        let tolerance = if tolerance_m.is_finite() {
            tolerance_m.max(0.0)
        } else {
            0.0
        };
        let projection = LocalProjection::for_points(&lat_lon);
        let line: LineString<f64> = lat_lon
            .iter()
            .map(|&(lat, lon)| projection.project(lat, lon))
            .collect();

        line.simplify_idx(&tolerance)
            .into_iter()
            .map(|i| lat_lon[i])
            .collect()
    };

    SimplifiedGeometry {
        workout_id: workout_id.to_string(),
        workout_type: workout_type.to_string(),
        coordinates,
        original_points: points.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zigzag(n: usize, amplitude_deg: f64) -> Vec<TrackPoint> {
        (0..n)
            .map(|i| {
                let wobble = if i % 2 == 0 { 0.0 } else { amplitude_deg };
                TrackPoint::new(-31.95 + i as f64 * 0.0002, 115.86 + wobble)
            })
            .collect()
    }

    /// Deterministic noisy loop, no RNG needed.
    fn noisy_loop(n: usize) -> Vec<TrackPoint> {
        (0..n)
            .map(|i| {
                let t = i as f64 / n as f64 * std::f64::consts::TAU;
                let noise = ((i * 7919) % 13) as f64 * 1e-6;
                TrackPoint::new(46.2 + 0.01 * t.sin() + noise, 6.1 + 0.015 * t.cos() - noise)
            })
            .collect()
    }

    #[test]
    fn test_short_tracks_unchanged() {
        for n in 0..=2 {
            let track = zigzag(n, 0.001);
            for tolerance in [0.0, 5.0, 1e9] {
                let geometry = simplify("w", "Walk", &track, tolerance);
                let expected: Vec<(f64, f64)> = track.iter().map(TrackPoint::lat_lon).collect();
                assert_eq!(geometry.coordinates, expected);
                assert_eq!(geometry.original_points, n);
            }
        }
    }

    #[test]
    fn test_endpoints_preserved() {
        let track = noisy_loop(500);
        for tolerance in [0.0, 1.0, 10.0, 100.0, 10_000.0] {
            let geometry = simplify("w", "Walk", &track, tolerance);
            assert_eq!(geometry.coordinates.first(), Some(&track[0].lat_lon()));
            assert_eq!(geometry.coordinates.last(), Some(&track[499].lat_lon()));
            assert!(geometry.coordinates.len() <= track.len());
        }
    }

    #[test]
    fn test_monotonic_in_tolerance() {
        let track = noisy_loop(400);
        let tolerances = [0.0, 0.5, 2.0, 5.0, 10.0, 25.0, 100.0, 1000.0];
        let lengths: Vec<usize> = tolerances
            .iter()
            .map(|&t| simplify("w", "Walk", &track, t).coordinates.len())
            .collect();
        for pair in lengths.windows(2) {
            assert!(pair[0] >= pair[1], "lengths not monotonic: {:?}", lengths);
        }
        assert!(lengths[0] > lengths[lengths.len() - 1]);
    }

    #[test]
    fn test_tolerance_is_in_meters() {
        // Side wobble of 0.00005 degrees longitude at -32 latitude is ~4.7 m
        let track = zigzag(21, 0.00005);
        assert_eq!(simplify("w", "Walk", &track, 10.0).coordinates.len(), 2);
        assert_eq!(simplify("w", "Walk", &track, 1.0).coordinates.len(), 21);
    }

    #[test]
    fn test_deterministic_and_bad_tolerance() {
        let track = noisy_loop(300);
        let a = simplify("w", "Hike", &track, 3.0);
        let b = simplify("w", "Hike", &track, 3.0);
        assert_eq!(a, b);
        assert_eq!(a.workout_type, "Hike");

        let zero = simplify("w", "Hike", &track, 0.0);
        assert_eq!(simplify("w", "Hike", &track, -5.0), zero);
        assert_eq!(simplify("w", "Hike", &track, f64::NAN), zero);
    }
}
