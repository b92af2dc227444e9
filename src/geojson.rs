//! GeoJSON artifacts.
//!
//! Each simplified workout is stored as one `Feature` with a `LineString`
//! geometry. Positions are `[longitude, latitude]` as GeoJSON requires.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::store::write_atomically;
use crate::{Result, SimplifiedGeometry, SyncError};

const FEATURE: &str = "Feature";
const FEATURE_COLLECTION: &str = "FeatureCollection";
const LINE_STRING: &str = "LineString";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: LineGeometry,
    pub properties: FeatureProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub workout_id: String,
    pub workout_type: String,
    pub original_points: usize,
    pub distance_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: FEATURE_COLLECTION.to_string(),
            features,
        }
    }
}

impl From<&SimplifiedGeometry> for Feature {
    fn from(geometry: &SimplifiedGeometry) -> Self {
        Feature {
            kind: FEATURE.to_string(),
            geometry: LineGeometry {
                kind: LINE_STRING.to_string(),
                coordinates: geometry
                    .coordinates
                    .iter()
                    .map(|&(lat, lon)| [lon, lat])
                    .collect(),
            },
            properties: FeatureProperties {
                workout_id: geometry.workout_id.clone(),
                workout_type: geometry.workout_type.clone(),
                original_points: geometry.original_points,
                distance_m: (geometry.distance_m() * 10.0).round() / 10.0,
            },
        }
    }
}

impl TryFrom<Feature> for SimplifiedGeometry {
    type Error = String;

    fn try_from(feature: Feature) -> std::result::Result<Self, Self::Error> {
        if feature.kind != FEATURE {
            return Err(format!("expected a Feature, found '{}'", feature.kind));
        }
        if feature.geometry.kind != LINE_STRING {
            return Err(format!(
                "expected a LineString, found '{}'",
                feature.geometry.kind
            ));
        }
        Ok(SimplifiedGeometry {
            workout_id: feature.properties.workout_id,
            workout_type: feature.properties.workout_type,
            coordinates: feature
                .geometry
                .coordinates
                .into_iter()
                .map(|[lon, lat]| (lat, lon))
                .collect(),
            original_points: feature.properties.original_points,
        })
    }
}

/// Atomically write one workout artifact.
pub fn write_geometry(path: &Path, geometry: &SimplifiedGeometry) -> Result<()> {
    let feature = Feature::from(geometry);
    let bytes = serde_json::to_vec(&feature)
        .map_err(|e| SyncError::parse(path.display().to_string(), e))?;
    write_atomically(path, &bytes)
}

/// Read one workout artifact back.
pub fn read_feature(path: &Path) -> Result<Feature> {
    let bytes = std::fs::read(path).map_err(SyncError::io(path))?;
    serde_json::from_slice(&bytes).map_err(|e| SyncError::parse(path.display().to_string(), e))
}

/// Read one workout artifact back as geometry.
pub fn read_geometry(path: &Path) -> Result<SimplifiedGeometry> {
    SimplifiedGeometry::try_from(read_feature(path)?)
        .map_err(|e| SyncError::parse(path.display().to_string(), e))
}

/// Atomically write a collection of features.
pub fn write_collection(path: &Path, features: Vec<Feature>) -> Result<()> {
    let collection = FeatureCollection::new(features);
    let bytes = serde_json::to_vec(&collection)
        .map_err(|e| SyncError::parse(path.display().to_string(), e))?;
    write_atomically(path, &bytes)
}
