//! # Sync Engine
//!
//! Reconciles the local workout store with a [`RemoteSource`].
//!
//! - **Quick**: fetch the list, download tracks for workouts not yet in the
//!   store, stop after a run of already-known workouts.
//! - **Full**: fetch the list, merge all metadata, relink or re-download
//!   missing and broken tracks, refresh fingerprints.
//! - **Local CSV**: add metadata for unknown workouts from the last saved copy
//!   of the remote list, without touching the network.
//!
//! Every mode saves the store exactly once, at the end. A fatal error before
//! that point (list fetch, authentication, archive scan) leaves the workout
//! table as it was. Individual download failures are counted on the summary
//! and retried by the next Full sync.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::tcx::read_summary;
use crate::workout::{parse_workout_list, write_workout_list};
use crate::{
    RemoteSource, Result, SyncConfig, SyncError, SyncOptions, UpsertOutcome, WorkoutRecord,
    WorkoutStore,
};

/// Sync strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Quick,
    Full,
    LocalCsv,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMode::Quick => "quick",
            SyncMode::Full => "full",
            SyncMode::LocalCsv => "local-csv",
        };
        f.write_str(name)
    }
}

/// What a sync run did.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSummary {
    pub mode: SyncMode,
    /// Workouts new to the store
    pub added: usize,
    /// Existing workouts whose metadata changed
    pub updated: usize,
    /// Existing workouts whose missing or broken track was restored
    pub repaired: usize,
    /// Track downloads that failed
    pub failed: usize,
    pub fingerprints_updated: usize,
    /// Remote entries already present and left alone
    pub skipped: usize,
    /// Ids behind `failed`
    pub failed_ids: Vec<String>,
}

impl SyncSummary {
    fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            added: 0,
            updated: 0,
            repaired: 0,
            failed: 0,
            fingerprints_updated: 0,
            skipped: 0,
            failed_ids: Vec::new(),
        }
    }

    fn record_failure(&mut self, workout_id: &str, error: &SyncError) {
        warn!(
            "[SyncEngine] Track for workout {} not archived: {}",
            workout_id, error
        );
        self.failed += 1;
        self.failed_ids.push(workout_id.to_string());
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sync: {} added, {} updated, {} repaired, {} failed, {} fingerprints updated, {} skipped",
            self.mode,
            self.added,
            self.updated,
            self.repaired,
            self.failed,
            self.fingerprints_updated,
            self.skipped
        )
    }
}

/// Owns the store for the duration of a run and drives one remote.
pub struct SyncEngine<R: RemoteSource> {
    store: WorkoutStore,
    remote: R,
    options: SyncOptions,
    backup_path: PathBuf,
}

impl<R: RemoteSource> SyncEngine<R> {
    pub fn new(store: WorkoutStore, remote: R, options: SyncOptions, backup_path: PathBuf) -> Self {
        Self {
            store,
            remote,
            options,
            backup_path,
        }
    }

    /// Load the configured store and bind it to `remote`.
    pub fn from_config(config: &SyncConfig, remote: R) -> Result<Self> {
        let store = WorkoutStore::load(&config.paths)?;
        Ok(Self::new(
            store,
            remote,
            config.sync.clone(),
            config.paths.remote_backup_path(),
        ))
    }

    pub fn store(&self) -> &WorkoutStore {
        &self.store
    }

    pub fn into_store(self) -> WorkoutStore {
        self.store
    }

    /// Run one sync in the given mode. Local CSV reads the configured backup.
    pub fn run(&mut self, mode: SyncMode) -> Result<SyncSummary> {
        match mode {
            SyncMode::Quick => self.quick_sync(),
            SyncMode::Full => self.full_sync(),
            SyncMode::LocalCsv => {
                let backup = self.backup_path.clone();
                self.local_csv_sync(&backup)
            }
        }
    }

    // ========================================================================
    // Quick sync
    // ========================================================================

    /// Download tracks for workouts the store has not seen yet.
    pub fn quick_sync(&mut self) -> Result<SyncSummary> {
        let mut summary = SyncSummary::new(SyncMode::Quick);
        let remote = self.fetch_remote_list()?;
        let limit = self.options.known_run_limit;

        let mut known_run = 0usize;
        for entry in remote {
            if self.store.contains(&entry.workout_id) {
                summary.skipped += 1;
                known_run += 1;
                if limit > 0 && known_run >= limit {
                    info!(
                        "[SyncEngine] {} known workouts in a row, stopping scan",
                        known_run
                    );
                    break;
                }
                continue;
            }
            known_run = 0;

            let mut record = entry;
            match self.download_into(&mut record) {
                Ok(()) => {}
                Err(e) if e.is_per_workout() => summary.record_failure(&record.workout_id, &e),
                Err(e) => return Err(e),
            }
            self.store.upsert(record);
            summary.added += 1;
        }

        self.finish(summary)
    }

    // ========================================================================
    // Full sync
    // ========================================================================

    /// Merge the whole remote list and bring every track back in line.
    pub fn full_sync(&mut self) -> Result<SyncSummary> {
        let mut summary = SyncSummary::new(SyncMode::Full);
        let remote = self.fetch_remote_list()?;

        let mut inserted = BTreeSet::new();
        let mut remote_ids = Vec::with_capacity(remote.len());
        for entry in remote {
            let id = entry.workout_id.clone();
            match self.store.upsert(entry) {
                UpsertOutcome::Inserted => {
                    summary.added += 1;
                    inserted.insert(id.clone());
                }
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Unchanged => {}
            }
            remote_ids.push(id);
        }

        summary.repaired += self.relink_archived_tracks()?;

        let broken = self.store.verify_integrity();
        for id in &broken {
            self.store.clear_track(id);
        }

        let mut targets: BTreeSet<String> = broken;
        targets.extend(
            remote_ids
                .into_iter()
                .filter(|id| self.store.get(id).is_some_and(|r| r.tcx_path.is_empty())),
        );

        if !targets.is_empty() {
            info!("[SyncEngine] Downloading {} missing tracks", targets.len());
        }
        for id in targets {
            let Some(mut record) = self.store.get(&id).cloned() else {
                continue;
            };
            match self.download_into(&mut record) {
                Ok(()) => {
                    self.store.upsert(record);
                    if !inserted.contains(&id) {
                        summary.repaired += 1;
                    }
                }
                Err(e) if e.is_per_workout() => summary.record_failure(&id, &e),
                Err(e) => return Err(e),
            }
        }

        summary.fingerprints_updated = self.refresh_fingerprints();

        self.finish(summary)
    }

    /// Point records with no usable track at an archived file carrying their
    /// id. Returns how many records were relinked.
    fn relink_archived_tracks(&mut self) -> Result<usize> {
        let archive = self.store.scan_track_archive()?;

        let mut relinked = 0usize;
        for (id, path) in archive {
            let Some(record) = self.store.get(&id) else {
                continue;
            };
            let usable = !record.tcx_path.is_empty() && self.store.check_track(record).is_ok();
            if usable || record.tcx_path == path {
                continue;
            }

            let mut patch = WorkoutRecord::new(&id, "", "");
            patch.tcx_path = path.clone();
            if self.store.upsert(patch) == UpsertOutcome::Updated {
                debug!("[SyncEngine] Relinked workout {} to {}", id, path);
                relinked += 1;
            }
        }
        Ok(relinked)
    }

    /// Recompute fingerprints from archived tracks. Returns how many changed.
    fn refresh_fingerprints(&mut self) -> usize {
        let with_tracks: Vec<(String, String, String)> = self
            .store
            .records()
            .into_iter()
            .filter(|r| !r.tcx_path.is_empty())
            .map(|r| (r.workout_id.clone(), r.tcx_path.clone(), r.fingerprint.clone()))
            .collect();

        let mut changed = 0usize;
        for (id, tcx_path, current) in with_tracks {
            let path = self.store.resolve(&tcx_path);
            let fingerprint = match fs::read(&path)
                .map_err(SyncError::io(&path))
                .and_then(|bytes| read_summary(&bytes, &tcx_path))
            {
                Ok(track_summary) => track_summary.fingerprint(),
                Err(e) => {
                    debug!("[SyncEngine] No fingerprint for workout {}: {}", id, e);
                    continue;
                }
            };
            if fingerprint != current {
                let mut patch = WorkoutRecord::new(&id, "", "");
                patch.fingerprint = fingerprint;
                self.store.upsert(patch);
                changed += 1;
            }
        }
        changed
    }

    // ========================================================================
    // Local CSV sync
    // ========================================================================

    /// Add unknown workouts from a saved remote list. Existing records are
    /// never modified and nothing is downloaded.
    pub fn local_csv_sync(&mut self, path: &Path) -> Result<SyncSummary> {
        let mut summary = SyncSummary::new(SyncMode::LocalCsv);

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::Config(format!(
                    "remote list backup '{}' does not exist; run a quick or full sync first",
                    path.display()
                )));
            }
            Err(e) => return Err(SyncError::io(path)(e)),
        };
        let entries = parse_workout_list(&bytes, &path.display().to_string())?;
        info!(
            "[SyncEngine] Read {} workouts from {}",
            entries.len(),
            path.display()
        );

        for entry in entries {
            if self.store.contains(&entry.workout_id) {
                summary.skipped += 1;
                continue;
            }
            self.store.upsert(entry);
            summary.added += 1;
        }

        self.finish(summary)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn fetch_remote_list(&mut self) -> Result<Vec<WorkoutRecord>> {
        let remote = self.remote.list_remote_workouts()?;
        info!("[SyncEngine] Remote lists {} workouts", remote.len());

        if let Err(e) = write_workout_list(&self.backup_path, &remote) {
            warn!("[SyncEngine] Could not back up remote list: {}", e);
        }
        Ok(remote)
    }

    /// Download, archive and fingerprint one workout's track.
    fn download_into(&mut self, record: &mut WorkoutRecord) -> Result<()> {
        let bytes = self.remote.download_track(&record.workout_id)?;
        record.tcx_path = self.store.archive_track(record, &bytes)?;

        match read_summary(&bytes, &record.tcx_path) {
            Ok(track_summary) => record.fingerprint = track_summary.fingerprint(),
            Err(e) => debug!(
                "[SyncEngine] No fingerprint for workout {}: {}",
                record.workout_id, e
            ),
        }
        Ok(())
    }

    fn finish(&mut self, summary: SyncSummary) -> Result<SyncSummary> {
        self.store.save()?;
        info!("[SyncEngine] {}", summary);
        Ok(summary)
    }
}
