//! # Workout Sync
//!
//! Keeps a local archive of workout records and their GPS tracks in step with
//! a remote account, and reduces archived tracks to small GeoJSON geometries
//! for map rendering.
//!
//! This library provides:
//! - A CSV-backed workout store with atomic saves and integrity checks
//! - A sync engine with quick, full and offline (backup CSV) modes
//! - Douglas-Peucker track simplification with a tolerance in meters
//! - A map batch builder that writes one GeoJSON artifact per workout
//!
//! ## Features
//!
//! - **`http`** - HTTP remote client and the `workout-sync` binary (default)
//! - **`parallel`** - Parallel parsing/simplification with rayon
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use workout_sync::{simplify, TrackPoint};
//!
//! let track: Vec<TrackPoint> = (0..20)
//!     .map(|i| TrackPoint::new(51.5 + i as f64 * 0.0005, -0.12))
//!     .collect();
//!
//! // A straight line collapses to its endpoints
//! let geometry = simplify("42", "Walk", &track, 10.0);
//! assert_eq!(geometry.coordinates.len(), 2);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, SyncError};

// Configuration loaded from TOML
pub mod config;
pub use config::{MapConfig, PathsConfig, RemoteConfig, SyncConfig, SyncOptions};

// Geographic utilities (distance, projection)
pub mod geo_utils;

// TCX track parsing
pub mod tcx;
pub use tcx::{parse_track, read_summary, TcxSummary};

// Workout records and the remote CSV list format
pub mod workout;
pub use workout::{parse_workout_list, write_workout_list, WorkoutRecord};

// Persistent workout table and track archive
pub mod store;
pub use store::{UpsertOutcome, WorkoutStore};

// Douglas-Peucker track simplification
pub mod simplify;
pub use simplify::{simplify, SimplifiedGeometry};

// GeoJSON artifacts
pub mod geojson;

// Remote collaborator interface
pub mod remote;
pub use remote::{Offline, RemoteSource};

// Sync engine (quick, full, local CSV)
pub mod sync;
pub use sync::{SyncEngine, SyncMode, SyncSummary};

// Map batch builder
pub mod batch;
pub use batch::{BatchSummary, MapBatchBuilder};

// HTTP client for the remote account
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{Credentials, HttpWorkoutClient};

// ============================================================================
// Core Types
// ============================================================================

/// A single GPS sample from a raw track file.
///
/// Only latitude and longitude survive simplification; elevation and
/// timestamp are carried for completeness of the parsed track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

impl TrackPoint {
    /// Create a point without elevation or timestamp.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
            time: None,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// (latitude, longitude) pair.
    pub fn lat_lon(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_point_validation() {
        assert!(TrackPoint::new(51.5074, -0.1278).is_valid());
        assert!(!TrackPoint::new(91.0, 0.0).is_valid());
        assert!(!TrackPoint::new(0.0, 181.0).is_valid());
        assert!(!TrackPoint::new(f64::NAN, 0.0).is_valid());
    }
}
