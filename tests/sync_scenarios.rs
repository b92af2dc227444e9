//! End-to-end sync scenarios against an in-memory remote.

use std::collections::HashMap;
use std::fs;

use tempfile::TempDir;
use workout_sync::{
    RemoteSource, Result, SyncConfig, SyncEngine, SyncError, WorkoutRecord, WorkoutStore,
};

fn tcx(seconds: u32, meters: u32) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase>
  <Activities>
    <Activity Sport="Walking">
      <Lap>
        <TotalTimeSeconds>{}</TotalTimeSeconds>
        <DistanceMeters>{}</DistanceMeters>
        <Track>
          <Trackpoint><Position><LatitudeDegrees>-31.950</LatitudeDegrees><LongitudeDegrees>115.860</LongitudeDegrees></Position></Trackpoint>
          <Trackpoint><Position><LatitudeDegrees>-31.951</LatitudeDegrees><LongitudeDegrees>115.862</LongitudeDegrees></Position></Trackpoint>
          <Trackpoint><Position><LatitudeDegrees>-31.952</LatitudeDegrees><LongitudeDegrees>115.861</LongitudeDegrees></Position></Trackpoint>
        </Track>
      </Lap>
    </Activity>
  </Activities>
</TrainingCenterDatabase>"#,
        seconds, meters
    )
    .into_bytes()
}

#[derive(Default)]
struct FakeRemote {
    workouts: Vec<WorkoutRecord>,
    tracks: HashMap<String, Vec<u8>>,
    list_error: Option<fn() -> SyncError>,
    download_error: Option<fn() -> SyncError>,
    downloads: Vec<String>,
}

impl FakeRemote {
    fn with(ids: &[&str]) -> Self {
        let mut remote = FakeRemote::default();
        for (day, id) in ids.iter().enumerate() {
            let mut record = WorkoutRecord::new(id, "Walk", &format!("Jan. {}, 2024", day + 1));
            record.set_field("Notes", &format!("walk {}", id));
            record.set_field("Distance (km)", "1.5");
            remote.workouts.push(record);
            remote.tracks.insert(id.to_string(), tcx(600, 1500));
        }
        remote
    }
}

impl RemoteSource for FakeRemote {
    fn list_remote_workouts(&mut self) -> Result<Vec<WorkoutRecord>> {
        match self.list_error {
            Some(error) => Err(error()),
            None => Ok(self.workouts.clone()),
        }
    }

    fn download_track(&mut self, workout_id: &str) -> Result<Vec<u8>> {
        self.downloads.push(workout_id.to_string());
        if let Some(error) = self.download_error {
            return Err(error());
        }
        self.tracks
            .get(workout_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(workout_id.to_string()))
    }
}

fn config_in(dir: &TempDir) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.paths.root = dir.path().to_path_buf();
    config.sync.known_run_limit = 0;
    config
}

fn load(config: &SyncConfig) -> WorkoutStore {
    WorkoutStore::load(&config.paths).unwrap()
}

fn quick(config: &SyncConfig, remote: &mut FakeRemote) {
    SyncEngine::from_config(config, remote)
        .unwrap()
        .quick_sync()
        .unwrap();
}

#[test]
fn quick_sync_adds_only_new_workouts() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    quick(&config, &mut FakeRemote::with(&["101", "102"]));

    let mut remote = FakeRemote::with(&["101", "102", "103"]);
    let mut engine = SyncEngine::from_config(&config, &mut remote).unwrap();
    let summary = engine.quick_sync().unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.skipped, 2);
    drop(engine);
    assert_eq!(remote.downloads, vec!["103".to_string()]);

    let store = load(&config);
    assert_eq!(store.len(), 3);
    let c = store.get("103").unwrap();
    assert!(!c.tcx_path.is_empty());
    assert!(store.check_track(c).is_ok());
    assert_eq!(c.fingerprint, "T00000600D0000150000");
    assert_eq!(c.tcx_path, "tracks/2024 01 03 walk 103 1.50km Walk (W103).tcx");
}

#[test]
fn full_sync_repairs_deleted_track() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    quick(&config, &mut FakeRemote::with(&["101", "102"]));

    let before = load(&config);
    let a_path = before.resolve(&before.get("101").unwrap().tcx_path);
    fs::remove_file(&a_path).unwrap();
    assert!(before.verify_integrity().contains("101"));

    let mut remote = FakeRemote::with(&["101", "102"]);
    let summary = SyncEngine::from_config(&config, &mut remote)
        .unwrap()
        .full_sync()
        .unwrap();
    assert_eq!(summary.repaired, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(remote.downloads, vec!["101".to_string()]);

    let after = load(&config);
    assert!(after.verify_integrity().is_empty());
    assert!(after.resolve(&after.get("101").unwrap().tcx_path).is_file());
}

#[test]
fn full_sync_replaces_empty_track_in_place() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    quick(&config, &mut FakeRemote::with(&["101"]));

    let store = load(&config);
    let archived = store.get("101").unwrap().tcx_path.clone();
    fs::write(store.resolve(&archived), "").unwrap();

    let mut remote = FakeRemote::with(&["101"]);
    let summary = SyncEngine::from_config(&config, &mut remote)
        .unwrap()
        .full_sync()
        .unwrap();
    assert_eq!(summary.repaired, 1);
    assert_eq!(remote.downloads, vec!["101".to_string()]);

    let after = load(&config);
    assert_eq!(after.get("101").unwrap().tcx_path, archived);
    assert!(after.verify_integrity().is_empty());
    let names: Vec<_> = fs::read_dir(dir.path().join("tracks"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names.len(), 1);
}

#[test]
fn full_sync_relinks_archived_track_without_download() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    quick(&config, &mut FakeRemote::with(&["101"]));

    let mut store = load(&config);
    let archived = store.get("101").unwrap().tcx_path.clone();
    let mut patch = WorkoutRecord::new("101", "", "");
    patch.tcx_path = "tracks/moved away.tcx".to_string();
    store.upsert(patch);
    store.save().unwrap();

    let mut remote = FakeRemote::with(&["101"]);
    let summary = SyncEngine::from_config(&config, &mut remote)
        .unwrap()
        .full_sync()
        .unwrap();
    assert_eq!(summary.repaired, 1);
    assert!(remote.downloads.is_empty());
    assert_eq!(load(&config).get("101").unwrap().tcx_path, archived);
}

#[test]
fn full_sync_retries_failed_download_and_merges_metadata() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let mut flaky = FakeRemote::with(&["101", "102"]);
    flaky.tracks.remove("102");
    let summary = SyncEngine::from_config(&config, &mut flaky)
        .unwrap()
        .quick_sync()
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert!(load(&config).get("102").unwrap().tcx_path.is_empty());

    let mut remote = FakeRemote::with(&["101", "102"]);
    remote.workouts[0].set_field("Notes", "renamed on the website");
    let summary = SyncEngine::from_config(&config, &mut remote)
        .unwrap()
        .full_sync()
        .unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.repaired, 1);
    assert_eq!(remote.downloads, vec!["102".to_string()]);

    let store = load(&config);
    assert_eq!(store.get("101").unwrap().notes(), "renamed on the website");
    assert!(store.check_track(store.get("102").unwrap()).is_ok());
    assert!(!store.get("102").unwrap().tcx_path.is_empty());
}

#[test]
fn full_sync_refreshes_fingerprints() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    quick(&config, &mut FakeRemote::with(&["101"]));

    let store = load(&config);
    let a = store.get("101").unwrap();
    fs::write(store.resolve(&a.tcx_path), tcx(900, 2000)).unwrap();

    let summary = SyncEngine::from_config(&config, &mut FakeRemote::with(&["101"]))
        .unwrap()
        .full_sync()
        .unwrap();
    assert_eq!(summary.fingerprints_updated, 1);
    assert_eq!(load(&config).get("101").unwrap().fingerprint, "T00000900D0000200000");
}

#[test]
fn local_csv_sync_never_overwrites_existing_records() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    quick(&config, &mut FakeRemote::with(&["101"]));
    let original = load(&config).get("101").unwrap().clone();

    let csv = dir.path().join("export.csv");
    fs::write(
        &csv,
        "Workout Date,Activity Type,Notes,Link\n\
         \"Jan. 1, 2024\",Hike,changed,https://www.mapmyfitness.com/workout/101\n\
         \"Feb. 2, 2024\",Walk,new one,https://www.mapmyfitness.com/workout/104\n",
    )
    .unwrap();

    let summary = SyncEngine::from_config(&config, workout_sync::Offline)
        .unwrap()
        .local_csv_sync(&csv)
        .unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.skipped, 1);

    let store = load(&config);
    assert_eq!(store.get("101").unwrap(), &original);
    let d = store.get("104").unwrap();
    assert_eq!(d.notes(), "new one");
    assert!(d.tcx_path.is_empty());
}

#[test]
fn local_csv_sync_reads_backup_of_last_fetch() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let err = SyncEngine::from_config(&config, workout_sync::Offline)
        .unwrap()
        .run(workout_sync::SyncMode::LocalCsv)
        .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
    assert!(!config.paths.workout_table_path().exists());

    // A fetch writes the backup even when every download fails
    let mut remote = FakeRemote::with(&["101", "102"]);
    remote.tracks.clear();
    quick(&config, &mut remote);
    fs::remove_file(config.paths.workout_table_path()).unwrap();

    let summary = SyncEngine::from_config(&config, workout_sync::Offline)
        .unwrap()
        .run(workout_sync::SyncMode::LocalCsv)
        .unwrap();
    assert_eq!(summary.added, 2);
    assert_eq!(load(&config).len(), 2);
}

#[test]
fn failed_fetch_leaves_table_byte_identical() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    quick(&config, &mut FakeRemote::with(&["101", "102"]));
    let table = config.paths.workout_table_path();
    let before = fs::read(&table).unwrap();

    let failures: [fn() -> SyncError; 2] = [
        || SyncError::Network {
            message: "connection reset".to_string(),
            status_code: None,
        },
        || SyncError::Auth("password rejected".to_string()),
    ];
    for failure in failures {
        let mut remote = FakeRemote::with(&["101", "102", "103"]);
        remote.list_error = Some(failure);

        let mut engine = SyncEngine::from_config(&config, &mut remote).unwrap();
        assert!(engine.quick_sync().is_err());
        assert!(engine.full_sync().is_err());
        drop(engine);

        assert!(remote.downloads.is_empty());
        assert_eq!(fs::read(&table).unwrap(), before);
        assert!(!dir.path().join("workouts.csv.tmp").exists());
    }
}

#[test]
fn auth_failure_during_download_aborts_without_saving() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    quick(&config, &mut FakeRemote::with(&["101"]));
    let store = load(&config);
    fs::remove_file(store.resolve(&store.get("101").unwrap().tcx_path)).unwrap();
    let table = config.paths.workout_table_path();
    let before = fs::read(&table).unwrap();

    let mut remote = FakeRemote::with(&["101", "102", "103"]);
    remote.download_error = Some(|| SyncError::Auth("session expired".to_string()));
    let err = SyncEngine::from_config(&config, &mut remote)
        .unwrap()
        .quick_sync()
        .unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)));
    assert_eq!(remote.downloads.len(), 1);
    assert_eq!(fs::read(&table).unwrap(), before);

    remote.downloads.clear();
    let err = SyncEngine::from_config(&config, &mut remote)
        .unwrap()
        .full_sync()
        .unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)));
    assert_eq!(remote.downloads.len(), 1);
    assert_eq!(fs::read(&table).unwrap(), before);
    assert!(!dir.path().join("workouts.csv.tmp").exists());
}

#[test]
fn failure_after_fetch_leaves_table_byte_identical() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    quick(&config, &mut FakeRemote::with(&["101"]));
    let table = config.paths.workout_table_path();
    let before = fs::read(&table).unwrap();

    let tracks = dir.path().join("tracks");
    fs::remove_dir_all(&tracks).unwrap();
    fs::write(&tracks, "not a directory").unwrap();

    let mut remote = FakeRemote::with(&["101", "102"]);
    remote.workouts[0].set_field("Notes", "renamed on the website");
    let err = SyncEngine::from_config(&config, &mut remote)
        .unwrap()
        .full_sync()
        .unwrap_err();
    assert!(matches!(err, SyncError::Io { .. }));

    // The list was fetched and merged in memory, then dropped with the engine
    assert!(config.paths.remote_backup_path().is_file());
    assert!(remote.downloads.is_empty());
    assert_eq!(fs::read(&table).unwrap(), before);
    assert!(!dir.path().join("workouts.csv.tmp").exists());
}

#[test]
fn corrupt_table_aborts_before_sync() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let table = config.paths.workout_table_path();
    fs::write(&table, "Workout ID,Activity Type\n1,Walk\n1,Walk\n").unwrap();

    let result = SyncEngine::from_config(&config, FakeRemote::with(&["1"]));
    assert!(matches!(result, Err(SyncError::StoreCorrupt { .. })));
    assert_eq!(
        fs::read_to_string(&table).unwrap(),
        "Workout ID,Activity Type\n1,Walk\n1,Walk\n"
    );
}
