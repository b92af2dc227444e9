//! The remote account as seen by the sync engine.

use crate::{Result, SyncError, WorkoutRecord};

/// Source of workout metadata and raw tracks.
///
/// [`crate::HttpWorkoutClient`] talks to the real account; tests use an
/// in-memory implementation. Methods take `&mut self` so an implementation
/// can establish its session lazily on first use.
pub trait RemoteSource {
    /// Fetch the full workout list in one round trip.
    ///
    /// Fails with `Auth` or `Network`; the caller treats either as fatal.
    fn list_remote_workouts(&mut self) -> Result<Vec<WorkoutRecord>>;

    /// Download the raw TCX bytes of one workout.
    ///
    /// `NotFound` and `Network` failures are recorded on that workout and
    /// the run moves on. `Auth` ends the run before anything is saved.
    fn download_track(&mut self, workout_id: &str) -> Result<Vec<u8>>;
}

impl<R: RemoteSource + ?Sized> RemoteSource for &mut R {
    fn list_remote_workouts(&mut self) -> Result<Vec<WorkoutRecord>> {
        (**self).list_remote_workouts()
    }

    fn download_track(&mut self, workout_id: &str) -> Result<Vec<u8>> {
        (**self).download_track(workout_id)
    }
}

impl<R: RemoteSource + ?Sized> RemoteSource for Box<R> {
    fn list_remote_workouts(&mut self) -> Result<Vec<WorkoutRecord>> {
        (**self).list_remote_workouts()
    }

    fn download_track(&mut self, workout_id: &str) -> Result<Vec<u8>> {
        (**self).download_track(workout_id)
    }
}

/// A remote that is never reachable. Lets a [`crate::SyncEngine`] run a
/// local CSV sync without credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

impl RemoteSource for Offline {
    fn list_remote_workouts(&mut self) -> Result<Vec<WorkoutRecord>> {
        Err(SyncError::Config("no remote configured for offline run".to_string()))
    }

    fn download_track(&mut self, workout_id: &str) -> Result<Vec<u8>> {
        Err(SyncError::Config(format!(
            "no remote configured for offline run, cannot download {}",
            workout_id
        )))
    }
}
