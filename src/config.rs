//! Configuration for sync and map generation.
//!
//! A single [`SyncConfig`] value is loaded once per run (from TOML, or built
//! from defaults) and handed to the store, the sync engine, the map batch
//! builder and the remote client. Nothing reads configuration globally.
//!
//! ```toml
//! [paths]
//! root = "/home/me/workouts"
//!
//! [remote]
//! csv_export_url = "https://www.mapmyfitness.com/workout/export/csv"
//!
//! [map]
//! tolerance_m = 15.0
//! workout_types = ["Walk", "Hike"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Result, SyncError};

/// Placeholder substituted into the TCX export URL template.
pub const WORKOUT_ID_PLACEHOLDER: &str = "{workout_id}";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub paths: PathsConfig,
    pub remote: RemoteConfig,
    pub sync: SyncOptions,
    pub map: MapConfig,
}

/// Locations of persisted state. Relative entries resolve against `root`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Data root; record paths are stored relative to it
    pub root: PathBuf,
    /// Master workout table (CSV)
    pub workout_table: PathBuf,
    /// Raw TCX archive directory
    pub tracks_dir: PathBuf,
    /// Simplified GeoJSON artifact directory
    pub simplified_dir: PathBuf,
    /// Copy of the last fetched remote workout list (CSV)
    pub remote_backup: PathBuf,
    /// Combined route collection handed to the map renderer
    pub route_collection: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            workout_table: PathBuf::from("workouts.csv"),
            tracks_dir: PathBuf::from("tracks"),
            simplified_dir: PathBuf::from("simplified"),
            remote_backup: PathBuf::from("remote_workouts.csv"),
            route_collection: PathBuf::from("all_routes.geojson"),
        }
    }
}

impl PathsConfig {
    /// Resolve a configured path against the data root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    pub fn workout_table_path(&self) -> PathBuf {
        self.resolve(&self.workout_table)
    }

    pub fn remote_backup_path(&self) -> PathBuf {
        self.resolve(&self.remote_backup)
    }

    pub fn route_collection_path(&self) -> PathBuf {
        self.resolve(&self.route_collection)
    }
}

/// Remote account endpoints and client behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub login_url: String,
    pub csv_export_url: String,
    /// Must contain `{workout_id}`
    pub tcx_export_url_template: String,
    /// Environment variable holding the account user name
    pub username_env: String,
    /// Environment variable holding the account password
    pub password_env: String,
    pub request_timeout_secs: u64,
    /// Upper bound on the login round trip, including any manual step
    pub login_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            login_url: "https://www.mapmyfitness.com/auth/login/".to_string(),
            csv_export_url: "https://www.mapmyfitness.com/workout/export/csv".to_string(),
            tcx_export_url_template:
                "https://www.mapmyfitness.com/workout/export/{workout_id}/tcx".to_string(),
            username_env: "MAPMYRIDE_USERNAME".to_string(),
            password_env: "MAPMYRIDE_PASSWORD".to_string(),
            request_timeout_secs: 30,
            login_timeout_secs: 120,
            max_retries: 3,
        }
    }
}

impl RemoteConfig {
    /// TCX download URL for one workout.
    pub fn tcx_url(&self, workout_id: &str) -> String {
        self.tcx_export_url_template
            .replace(WORKOUT_ID_PLACEHOLDER, workout_id)
    }
}

/// Sync engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Quick sync stops after this many consecutive already-known workouts.
    /// 0 scans the whole remote list.
    pub known_run_limit: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { known_run_limit: 25 }
    }
}

/// Map batch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Douglas-Peucker tolerance in meters
    pub tolerance_m: f64,
    /// Workout types that get a map artifact
    pub workout_types: Vec<String>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            tolerance_m: 10.0,
            workout_types: vec!["Walk".to_string(), "Hike".to_string()],
        }
    }
}

impl SyncConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        log::debug!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SyncConfig =
            toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self
            .remote
            .tcx_export_url_template
            .contains(WORKOUT_ID_PLACEHOLDER)
        {
            return Err(SyncError::Config(format!(
                "remote.tcx_export_url_template must contain {}",
                WORKOUT_ID_PLACEHOLDER
            )));
        }
        if !self.map.tolerance_m.is_finite() || self.map.tolerance_m < 0.0 {
            return Err(SyncError::Config(format!(
                "map.tolerance_m must be a non-negative number, got {}",
                self.map.tolerance_m
            )));
        }
        if self.map.workout_types.iter().all(|t| t.trim().is_empty()) {
            return Err(SyncError::Config(
                "map.workout_types must name at least one workout type".to_string(),
            ));
        }
        Ok(())
    }
}
