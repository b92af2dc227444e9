//! # Workout Store
//!
//! The authoritative local table of workout records plus the raw track
//! archive it points into.
//!
//! ## Persistence
//!
//! Records live in memory keyed by workout id and are persisted as a single
//! CSV table. [`WorkoutStore::save`] writes a sibling temp file, syncs it and
//! renames it over the table, so an interrupted run leaves either the previous
//! table or the complete new one on disk.
//!
//! ## Paths
//!
//! `tcx_path` and `geojson_path` are stored relative to the data root so the
//! archive can be moved as a whole.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::workout::{read_rows, write_workout_list};
use crate::{PathsConfig, Result, SyncError, WorkoutRecord};

const TRACK_EXTENSION: &str = "tcx";

/// Result of [`WorkoutStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The workout id was new
    Inserted,
    /// An existing record changed
    Updated,
    /// Nothing new in the incoming record
    Unchanged,
}

/// In-memory workout table bound to its location on disk.
#[derive(Debug)]
pub struct WorkoutStore {
    root: PathBuf,
    table_path: PathBuf,
    tracks_dir: PathBuf,
    records: HashMap<String, WorkoutRecord>,
}

impl WorkoutStore {
    /// Empty store bound to the configured locations (nothing is read).
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            root: paths.root.clone(),
            table_path: paths.workout_table_path(),
            tracks_dir: paths.tracks_dir.clone(),
            records: HashMap::new(),
        }
    }

    /// Load the workout table. A missing table yields an empty store; a table
    /// that cannot be parsed fails with [`SyncError::StoreCorrupt`].
    pub fn load(paths: &PathsConfig) -> Result<Self> {
        let mut store = Self::new(paths);

        let bytes = match fs::read(&store.table_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "[WorkoutStore] No table at {}, starting empty",
                    store.table_path.display()
                );
                return Ok(store);
            }
            Err(e) => return Err(store.corrupt(format!("unreadable: {}", e))),
        };

        let source_name = store.table_path.display().to_string();
        let rows = read_rows(&bytes, &source_name).map_err(|e| store.corrupt(e.to_string()))?;

        for (index, record) in rows.into_iter().enumerate() {
            // Header is line 1
            let line = index + 2;
            if record.workout_id.is_empty() {
                return Err(store.corrupt(format!("line {} has no workout id", line)));
            }
            if store.records.contains_key(&record.workout_id) {
                return Err(store.corrupt(format!(
                    "line {} repeats workout id {}",
                    line, record.workout_id
                )));
            }
            store.records.insert(record.workout_id.clone(), record);
        }

        info!(
            "[WorkoutStore] Loaded {} workouts from {}",
            store.records.len(),
            store.table_path.display()
        );
        Ok(store)
    }

    fn corrupt(&self, message: String) -> SyncError {
        SyncError::StoreCorrupt {
            path: self.table_path.clone(),
            message,
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn contains(&self, workout_id: &str) -> bool {
        self.records.contains_key(workout_id)
    }

    pub fn get(&self, workout_id: &str) -> Option<&WorkoutRecord> {
        self.records.get(workout_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, newest first (undated last, ties by id).
    pub fn records(&self) -> Vec<&WorkoutRecord> {
        let mut records: Vec<&WorkoutRecord> = self.records.values().collect();
        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        records
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a record-relative path.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Record-relative form of a path under the data root.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert an unseen workout, or merge the non-empty fields of `record`
    /// into the existing one. Populated paths are never cleared here.
    pub fn upsert(&mut self, record: WorkoutRecord) -> UpsertOutcome {
        if record.workout_id.is_empty() {
            warn!("[WorkoutStore] Ignoring record without a workout id");
            return UpsertOutcome::Unchanged;
        }
        match self.records.get_mut(&record.workout_id) {
            Some(existing) => {
                if existing.merge_from(&record) {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Unchanged
                }
            }
            None => {
                self.records.insert(record.workout_id.clone(), record);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Forget a track path that failed verification. An empty file left at
    /// that path is removed so a re-download can take its name. Returns
    /// whether a path was cleared.
    pub fn clear_track(&mut self, workout_id: &str) -> bool {
        let Some(record) = self.records.get_mut(workout_id) else {
            return false;
        };
        if record.tcx_path.is_empty() {
            return false;
        }

        let path = self.root.join(&record.tcx_path);
        if fs::metadata(&path).is_ok_and(|meta| meta.is_file() && meta.len() == 0) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("[WorkoutStore] Removed empty track {}", path.display()),
                Err(e) => warn!(
                    "[WorkoutStore] Could not remove empty track {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        record.tcx_path.clear();
        true
    }

    /// Atomically persist every record.
    pub fn save(&self) -> Result<()> {
        write_workout_list(&self.table_path, self.records())?;
        info!(
            "[WorkoutStore] Saved {} workouts to {}",
            self.records.len(),
            self.table_path.display()
        );
        Ok(())
    }

    // ========================================================================
    // Integrity
    // ========================================================================

    /// Check that a record's track file exists and is non-empty. Records
    /// without a track pass trivially.
    pub fn check_track(&self, record: &WorkoutRecord) -> Result<()> {
        if record.tcx_path.is_empty() {
            return Ok(());
        }
        let path = self.resolve(&record.tcx_path);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
            _ => Err(SyncError::Integrity {
                workout_id: record.workout_id.clone(),
                path,
            }),
        }
    }

    /// Ids of records whose track path points at a missing or empty file.
    pub fn verify_integrity(&self) -> BTreeSet<String> {
        let failing: BTreeSet<String> = self
            .records
            .values()
            .filter_map(|record| match self.check_track(record) {
                Ok(()) => None,
                Err(e) => {
                    debug!("[WorkoutStore] {}", e);
                    Some(record.workout_id.clone())
                }
            })
            .collect();

        if !failing.is_empty() {
            info!(
                "[WorkoutStore] {} workouts have missing or empty track files",
                failing.len()
            );
        }
        failing
    }

    // ========================================================================
    // Track archive
    // ========================================================================

    fn tracks_path(&self) -> PathBuf {
        self.root.join(&self.tracks_dir)
    }

    /// Write downloaded track bytes into the archive under the record's
    /// standardized name and return the record-relative path.
    pub fn archive_track(&self, record: &WorkoutRecord, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Err(SyncError::EmptyDownload(record.workout_id.clone()));
        }

        let dir = self.tracks_path();
        fs::create_dir_all(&dir).map_err(SyncError::io(&dir))?;

        let own_path = (!record.tcx_path.is_empty()).then(|| self.resolve(&record.tcx_path));
        let path = unique_track_path(&dir, &record.filename_stem(), own_path.as_deref());
        write_atomically(&path, bytes)?;

        debug!(
            "[WorkoutStore] Archived workout {} as {}",
            record.workout_id,
            path.display()
        );
        Ok(self.relative(&path))
    }

    /// Index archived tracks by the `(W<id>)` marker in their file names.
    ///
    /// When several files carry the same id, the one the record references is
    /// kept (else the first non-empty one by name) and the rest are deleted.
    pub fn scan_track_archive(&self) -> Result<BTreeMap<String, String>> {
        let dir = self.tracks_path();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(SyncError::io(&dir)(e)),
        };

        let mut by_id: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for entry in entries {
            let path = entry.map_err(SyncError::io(&dir))?.path();
            let is_track = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(TRACK_EXTENSION));
            if !is_track {
                continue;
            }
            let id = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(workout_id_from_filename);
            if let Some(id) = id {
                by_id.entry(id).or_default().push(path);
            }
        }

        let mut archive = BTreeMap::new();
        let mut deleted = 0usize;
        for (id, mut files) in by_id {
            files.sort();
            let referenced = self
                .get(&id)
                .filter(|r| !r.tcx_path.is_empty())
                .map(|r| self.resolve(&r.tcx_path));
            let keep = choose_kept_file(&files, referenced.as_deref());

            for file in files.iter().filter(|f| **f != keep) {
                match fs::remove_file(file) {
                    Ok(()) => {
                        deleted += 1;
                        info!(
                            "[WorkoutStore] Deleted duplicate track {} for workout {}",
                            file.display(),
                            id
                        );
                    }
                    Err(e) => warn!(
                        "[WorkoutStore] Could not delete duplicate {}: {}",
                        file.display(),
                        e
                    ),
                }
            }
            archive.insert(id, self.relative(&keep));
        }

        debug!(
            "[WorkoutStore] Archive scan: {} workouts, {} duplicates removed",
            archive.len(),
            deleted
        );
        Ok(archive)
    }
}

fn choose_kept_file(files: &[PathBuf], referenced: Option<&Path>) -> PathBuf {
    let non_empty = |p: &Path| fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false);

    if let Some(referenced) = referenced {
        if files.iter().any(|f| f == referenced) && non_empty(referenced) {
            return referenced.to_path_buf();
        }
    }
    files
        .iter()
        .find(|f| non_empty(f.as_path()))
        .unwrap_or(&files[0])
        .clone()
}

/// `<dir>/<stem>.tcx`, or `<stem>_0001.tcx` and so on if that name is taken
/// by a file other than `own_path`.
fn unique_track_path(dir: &Path, stem: &str, own_path: Option<&Path>) -> PathBuf {
    let candidate = dir.join(format!("{}.{}", stem, TRACK_EXTENSION));
    if !candidate.exists() || own_path == Some(candidate.as_path()) {
        return candidate;
    }
    (1u32..)
        .map(|n| dir.join(format!("{}_{:04}.{}", stem, n, TRACK_EXTENSION)))
        .find(|p| !p.exists() || own_path == Some(p.as_path()))
        .unwrap_or(candidate)
}

/// Workout id from an archive name such as `2023 09 05 Loop 3.40km Walk (W7001).tcx`.
pub fn workout_id_from_filename(name: &str) -> Option<String> {
    name.match_indices("(W").find_map(|(start, _)| {
        let rest = &name[start + 2..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        let closed = rest[digits.len()..].starts_with(')');
        (!digits.is_empty() && closed).then_some(digits)
    })
}

/// Write `bytes` to a sibling temp file, sync it and rename it over `path`.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(SyncError::io(parent))?;
    }

    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(e) = written {
        fs::remove_file(&tmp_path).ok();
        return Err(SyncError::io(&tmp_path)(e));
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        fs::remove_file(&tmp_path).ok();
        SyncError::io(path)(e)
    })
}
