//! # Map Batch Builder
//!
//! Turns archived tracks into one simplified GeoJSON artifact per workout and
//! bundles the artifacts into the route collection read by the map renderer.
//!
//! Reading and simplifying tracks is pure and runs on rayon under the
//! `parallel` feature. Artifact writes and store updates stay on the calling
//! thread, and the store is saved only when a record actually changed, so an
//! incremental run with nothing new writes nothing.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::geojson::{read_feature, write_collection, write_geometry};
use crate::{
    parse_track, simplify, Result, SimplifiedGeometry, SyncConfig, SyncError, UpsertOutcome,
    WorkoutRecord, WorkoutStore,
};

/// A line needs at least two points.
const MIN_TRACK_POINTS: usize = 2;

const ARTIFACT_EXTENSION: &str = "geojson";

/// What a batch run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Artifacts written
    pub created: usize,
    /// Records that already had an artifact on disk
    pub up_to_date: usize,
    /// Records without a usable track (none, missing, unparseable, too short)
    pub skipped: usize,
    /// Artifacts that could not be written
    pub failed: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} up to date, {} skipped, {} failed",
            self.created, self.up_to_date, self.skipped, self.failed
        )
    }
}

/// One record's track, resolved up front so the parse step needs no store.
struct TrackJob {
    workout_id: String,
    workout_type: String,
    track_path: PathBuf,
}

/// Writes simplified artifacts into a directory.
#[derive(Debug, Clone)]
pub struct MapBatchBuilder {
    simplified_dir: PathBuf,
    tolerance_m: f64,
}

impl MapBatchBuilder {
    pub fn new(simplified_dir: impl Into<PathBuf>, tolerance_m: f64) -> Self {
        Self {
            simplified_dir: simplified_dir.into(),
            tolerance_m,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.paths.resolve(&config.paths.simplified_dir),
            config.map.tolerance_m,
        )
    }

    pub fn simplified_dir(&self) -> &Path {
        &self.simplified_dir
    }

    /// Artifact location for a workout.
    pub fn artifact_path(&self, workout_id: &str) -> PathBuf {
        self.simplified_dir
            .join(format!("{}.{}", workout_id, ARTIFACT_EXTENSION))
    }

    /// Simplify every record of the given types and record the artifact path.
    ///
    /// With `only_if_missing`, records whose artifact already exists are left
    /// alone. Problems with one record are counted and logged; only a failed
    /// store save aborts the batch.
    pub fn simplify_workouts(
        &self,
        store: &mut WorkoutStore,
        workout_types: &BTreeSet<String>,
        only_if_missing: bool,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        let mut jobs = Vec::new();

        for record in store.records() {
            if !record.has_type_in(workout_types) {
                continue;
            }
            if only_if_missing && self.has_artifact(store, record) {
                summary.up_to_date += 1;
                continue;
            }
            if record.tcx_path.is_empty() {
                debug!("[MapBatch] Workout {} has no track", record.workout_id);
                summary.skipped += 1;
                continue;
            }
            jobs.push(TrackJob {
                workout_id: record.workout_id.clone(),
                workout_type: record.workout_type.clone(),
                track_path: store.resolve(&record.tcx_path),
            });
        }

        info!(
            "[MapBatch] Simplifying {} workouts at {} m tolerance",
            jobs.len(),
            self.tolerance_m
        );

        #[cfg(feature = "parallel")]
        let results: Vec<Result<SimplifiedGeometry>> = jobs
            .par_iter()
            .map(|job| build_geometry(job, self.tolerance_m))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<Result<SimplifiedGeometry>> = jobs
            .iter()
            .map(|job| build_geometry(job, self.tolerance_m))
            .collect();

        let mut changed = false;
        for (job, result) in jobs.iter().zip(results) {
            let geometry = match result {
                Ok(geometry) => geometry,
                Err(e) => {
                    warn!("[MapBatch] Skipping workout {}: {}", job.workout_id, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            let path = self.artifact_path(&job.workout_id);
            if let Err(e) = write_geometry(&path, &geometry) {
                warn!("[MapBatch] Could not write {}: {}", path.display(), e);
                summary.failed += 1;
                continue;
            }
            debug!(
                "[MapBatch] Workout {}: {} -> {} points",
                job.workout_id,
                geometry.original_points,
                geometry.coordinates.len()
            );
            summary.created += 1;

            let mut patch = WorkoutRecord::new(&job.workout_id, "", "");
            patch.geojson_path = store.relative(&path);
            if store.upsert(patch) == UpsertOutcome::Updated {
                changed = true;
            }
        }

        if changed {
            store.save()?;
        }
        info!("[MapBatch] {}", summary);
        Ok(summary)
    }

    fn has_artifact(&self, store: &WorkoutStore, record: &WorkoutRecord) -> bool {
        !record.geojson_path.is_empty() && store.resolve(&record.geojson_path).is_file()
    }

    /// Bundle every artifact in the simplified directory, ordered by file
    /// name, into one `FeatureCollection` at `out`. Returns the feature count.
    pub fn write_route_collection(&self, out: &Path) -> Result<usize> {
        let mut paths: Vec<PathBuf> = match fs::read_dir(&self.simplified_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION))
                })
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(SyncError::io(&self.simplified_dir)(e)),
        };
        paths.sort();

        let mut features = Vec::with_capacity(paths.len());
        for path in &paths {
            match read_feature(path) {
                Ok(feature) => features.push(feature),
                Err(e) => warn!("[MapBatch] Leaving out {}: {}", path.display(), e),
            }
        }

        let count = features.len();
        write_collection(out, features)?;
        info!(
            "[MapBatch] Wrote {} routes to {}",
            count,
            out.display()
        );
        Ok(count)
    }
}

fn build_geometry(job: &TrackJob, tolerance_m: f64) -> Result<SimplifiedGeometry> {
    let bytes = fs::read(&job.track_path).map_err(SyncError::io(&job.track_path))?;
    let points = parse_track(&bytes, &job.track_path.display().to_string())?;
    if points.len() < MIN_TRACK_POINTS {
        return Err(SyncError::InsufficientPoints {
            workout_id: job.workout_id.clone(),
            point_count: points.len(),
            minimum_required: MIN_TRACK_POINTS,
        });
    }
    Ok(simplify(
        &job.workout_id,
        &job.workout_type,
        &points,
        tolerance_m,
    ))
}
