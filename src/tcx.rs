//! TCX track parsing.
//!
//! Reads Training Center XML into ordered [`TrackPoint`]s (activities first,
//! courses as a fallback) and into a lap summary used for fingerprints.
//! Coordinates are read as text so a single malformed trackpoint is skipped
//! rather than failing the whole file.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::{Result, SyncError, TrackPoint};

/// Totals of the first lap that carries them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TcxSummary {
    /// Lap `TotalTimeSeconds`
    pub total_time_seconds: f64,
    /// Lap `DistanceMeters`
    pub distance_meters: f64,
}

impl TcxSummary {
    /// Duration/distance fingerprint: `T{seconds:08}D{centimetres:010}`.
    pub fn fingerprint(&self) -> String {
        let seconds = self.total_time_seconds.round().max(0.0) as u64;
        let centimetres = (self.distance_meters * 100.0).round().max(0.0) as u64;
        format!("T{:08}D{:010}", seconds, centimetres)
    }
}

/// Parse TCX bytes into an ordered track.
///
/// Returns an empty vector for a well-formed file without positions; fails
/// with [`SyncError::Parse`] on malformed XML.
pub fn parse_track(content: &[u8], source_name: &str) -> Result<Vec<TrackPoint>> {
    let tcx = decode(content, source_name)?;

    let mut points = Vec::new();
    let mut skipped = 0usize;

    let activity_tracks = tcx
        .activities
        .iter()
        .flat_map(|a| &a.activity)
        .flat_map(|activity| &activity.lap)
        .flat_map(|lap| &lap.track);
    collect_points(activity_tracks, &mut points, &mut skipped);

    if points.is_empty() {
        let course_tracks = tcx
            .courses
            .iter()
            .flat_map(|c| &c.course)
            .flat_map(|course| &course.track);
        collect_points(course_tracks, &mut points, &mut skipped);
    }

    if skipped > 0 {
        warn!(
            "[Tcx] Skipped {} malformed trackpoints in {}",
            skipped, source_name
        );
    }
    debug!("[Tcx] Extracted {} points from {}", points.len(), source_name);

    Ok(points)
}

/// Read lap totals from TCX bytes.
///
/// Each total comes from the first lap in document order that has it, so a
/// multi-lap file is fingerprinted by its opening lap. Missing totals read
/// as zero.
pub fn read_summary(content: &[u8], source_name: &str) -> Result<TcxSummary> {
    let tcx = decode(content, source_name)?;
    let laps: Vec<&Lap> = tcx
        .activities
        .iter()
        .flat_map(|a| &a.activity)
        .flat_map(|activity| &activity.lap)
        .collect();

    Ok(TcxSummary {
        total_time_seconds: laps
            .iter()
            .find_map(|lap| parse_number(lap.total_time_seconds.as_deref()))
            .unwrap_or(0.0),
        distance_meters: laps
            .iter()
            .find_map(|lap| parse_number(lap.distance_meters.as_deref()))
            .unwrap_or(0.0),
    })
}

fn decode(content: &[u8], source_name: &str) -> Result<TrainingCenterDatabase> {
    let text = std::str::from_utf8(content)
        .map_err(|e| SyncError::parse(source_name, format!("invalid UTF-8: {}", e)))?;
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if text.is_empty() {
        return Err(SyncError::parse(source_name, "file is empty"));
    }

    from_str(text).map_err(|e| SyncError::parse(source_name, format!("TCX parse error: {}", e)))
}

fn collect_points<'a>(
    tracks: impl Iterator<Item = &'a Track>,
    points: &mut Vec<TrackPoint>,
    skipped: &mut usize,
) {
    for trackpoint in tracks.flat_map(|t| &t.trackpoint) {
        // Trackpoints without a position (pauses, HR-only samples) are normal
        let Some(position) = &trackpoint.position else {
            continue;
        };

        let lat = parse_number(position.latitude_degrees.as_deref());
        let lon = parse_number(position.longitude_degrees.as_deref());
        let (Some(latitude), Some(longitude)) = (lat, lon) else {
            *skipped += 1;
            continue;
        };

        let point = TrackPoint {
            latitude,
            longitude,
            elevation: parse_number(trackpoint.altitude_meters.as_deref()),
            time: trackpoint.time.as_deref().and_then(|t| {
                DateTime::parse_from_rfc3339(t.trim())
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
        };

        if point.is_valid() {
            points.push(point);
        } else {
            *skipped += 1;
        }
    }
}

fn parse_number(text: Option<&str>) -> Option<f64> {
    text.and_then(|t| t.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

// TCX XML structures

#[derive(Debug, Deserialize)]
#[serde(rename = "TrainingCenterDatabase")]
struct TrainingCenterDatabase {
    #[serde(rename = "Activities")]
    activities: Option<Activities>,
    #[serde(rename = "Courses")]
    courses: Option<Courses>,
}

#[derive(Debug, Deserialize)]
struct Activities {
    #[serde(rename = "Activity", default)]
    activity: Vec<Activity>,
}

#[derive(Debug, Deserialize)]
struct Activity {
    #[serde(rename = "Lap", default)]
    lap: Vec<Lap>,
}

#[derive(Debug, Deserialize)]
struct Lap {
    #[serde(rename = "TotalTimeSeconds")]
    total_time_seconds: Option<String>,
    #[serde(rename = "DistanceMeters")]
    distance_meters: Option<String>,
    #[serde(rename = "Track", default)]
    track: Vec<Track>,
}

#[derive(Debug, Deserialize)]
struct Track {
    #[serde(rename = "Trackpoint", default)]
    trackpoint: Vec<Trackpoint>,
}

#[derive(Debug, Deserialize)]
struct Trackpoint {
    #[serde(rename = "Time")]
    time: Option<String>,
    #[serde(rename = "Position")]
    position: Option<Position>,
    #[serde(rename = "AltitudeMeters")]
    altitude_meters: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Position {
    #[serde(rename = "LatitudeDegrees")]
    latitude_degrees: Option<String>,
    #[serde(rename = "LongitudeDegrees")]
    longitude_degrees: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Courses {
    #[serde(rename = "Course", default)]
    course: Vec<Course>,
}

#[derive(Debug, Deserialize)]
struct Course {
    #[serde(rename = "Track", default)]
    track: Vec<Track>,
}
