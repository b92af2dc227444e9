//! Workout records and the tabular workout-list format.
//!
//! The remote account exports its workout list as CSV; the local workout table
//! and the offline backup use the same layout plus a few local columns
//! (`Workout ID`, `Filename`, `GeoJSON`, `Fingerprint`). Unknown columns are
//! carried through untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::NaiveDate;
use log::warn;

use crate::store::write_atomically;
use crate::{Result, SyncError};

pub const COL_DATE_SUBMITTED: &str = "Date Submitted";
pub const COL_WORKOUT_DATE: &str = "Workout Date";
pub const COL_ACTIVITY_TYPE: &str = "Activity Type";
pub const COL_LINK: &str = "Link";
pub const COL_FILENAME: &str = "Filename";
pub const COL_FINGERPRINT: &str = "Fingerprint";
pub const COL_NOTES: &str = "Notes";
pub const COL_DISTANCE_KM: &str = "Distance (km)";
pub const COL_WORKOUT_TIME: &str = "Workout Time (seconds)";
pub const COL_WORKOUT_ID: &str = "Workout ID";
pub const COL_GEOJSON: &str = "GeoJSON";

/// Column order for written tables; remaining columns follow alphabetically.
const PREFERRED_COLUMNS: [&str; 11] = [
    COL_DATE_SUBMITTED,
    COL_WORKOUT_DATE,
    COL_ACTIVITY_TYPE,
    COL_LINK,
    COL_FILENAME,
    COL_FINGERPRINT,
    COL_NOTES,
    COL_DISTANCE_KM,
    COL_WORKOUT_TIME,
    COL_WORKOUT_ID,
    COL_GEOJSON,
];

const MAX_NOTES_IN_FILENAME: usize = 50;

/// One workout: identity, category, file pointers and pass-through metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkoutRecord {
    /// Remote identifier; the store is keyed by it
    pub workout_id: String,
    /// Category label, e.g. "Walk" or "Bike Ride"
    pub workout_type: String,
    /// Workout date as reported by the remote
    pub start_time: String,
    /// Raw track path relative to the data root, empty if not downloaded
    pub tcx_path: String,
    /// Simplified artifact path relative to the data root, empty if not generated
    pub geojson_path: String,
    /// Duration/distance fingerprint of the archived track
    pub fingerprint: String,
    /// All other columns. Never holds empty values.
    pub metadata: BTreeMap<String, String>,
}

impl WorkoutRecord {
    pub fn new(workout_id: &str, workout_type: &str, start_time: &str) -> Self {
        Self {
            workout_id: workout_id.to_string(),
            workout_type: workout_type.to_string(),
            start_time: start_time.to_string(),
            ..Self::default()
        }
    }

    /// Build a record from one table row. The id comes from the `Workout ID`
    /// column, falling back to the last path segment of `Link`.
    pub fn from_row<'a>(row: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut record = Self::default();
        for (column, value) in row {
            record.set_field(column, value);
        }
        if record.workout_id.is_empty() {
            if let Some(link) = record.metadata.get(COL_LINK) {
                record.workout_id = workout_id_from_link(link);
            }
        }
        record
    }

    /// Set a column by its table name. Blank values are ignored. Identity
    /// and path columns are trimmed; other metadata is kept verbatim.
    pub fn set_field(&mut self, column: &str, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        let trimmed = trimmed.to_string();
        match column.trim() {
            COL_WORKOUT_ID => self.workout_id = trimmed,
            COL_ACTIVITY_TYPE => self.workout_type = trimmed,
            COL_WORKOUT_DATE => self.start_time = trimmed,
            COL_FILENAME => self.tcx_path = trimmed,
            COL_GEOJSON => self.geojson_path = trimmed,
            COL_FINGERPRINT => self.fingerprint = trimmed,
            other => {
                self.metadata.insert(other.to_string(), value.to_string());
            }
        }
    }

    /// All non-empty columns of this record.
    pub fn to_row(&self) -> BTreeMap<String, String> {
        let mut row = self.metadata.clone();
        for (column, value) in [
            (COL_WORKOUT_ID, &self.workout_id),
            (COL_ACTIVITY_TYPE, &self.workout_type),
            (COL_WORKOUT_DATE, &self.start_time),
            (COL_FILENAME, &self.tcx_path),
            (COL_GEOJSON, &self.geojson_path),
            (COL_FINGERPRINT, &self.fingerprint),
        ] {
            if !value.is_empty() {
                row.insert(column.to_string(), value.clone());
            }
        }
        row
    }

    /// Merge non-empty fields of `other` into `self`. Empty fields in `other`
    /// never clear populated ones. Returns whether anything changed.
    pub fn merge_from(&mut self, other: &WorkoutRecord) -> bool {
        let mut changed = false;
        for (mine, theirs) in [
            (&mut self.workout_type, &other.workout_type),
            (&mut self.start_time, &other.start_time),
            (&mut self.tcx_path, &other.tcx_path),
            (&mut self.geojson_path, &other.geojson_path),
            (&mut self.fingerprint, &other.fingerprint),
        ] {
            if !theirs.is_empty() && *mine != *theirs {
                *mine = theirs.clone();
                changed = true;
            }
        }
        for (column, value) in &other.metadata {
            if value.is_empty() {
                continue;
            }
            if self.metadata.get(column) != Some(value) {
                self.metadata.insert(column.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Parsed workout date, if the remote text is in a known format.
    pub fn workout_date(&self) -> Option<NaiveDate> {
        parse_workout_date(&self.start_time)
    }

    pub fn distance_km(&self) -> f64 {
        self.metadata
            .get(COL_DISTANCE_KM)
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite())
            .unwrap_or(0.0)
    }

    pub fn notes(&self) -> &str {
        self.metadata.get(COL_NOTES).map(String::as_str).unwrap_or("")
    }

    /// Whether the workout type is one of `types` (ASCII case-insensitive).
    pub fn has_type_in(&self, types: &BTreeSet<String>) -> bool {
        types
            .iter()
            .any(|t| t.trim().eq_ignore_ascii_case(self.workout_type.trim()))
    }

    /// Standardized archive file name without extension:
    /// `YYYY MM DD <notes> <km>km <type> (W<id>)`.
    pub fn filename_stem(&self) -> String {
        let date_prefix = self
            .workout_date()
            .map(|d| d.format("%Y %m %d").to_string())
            .unwrap_or_else(|| "0000 00 00".to_string());

        let activity = self.workout_type.replace(|c: char| c == '/' || c == '\\', "_");

        let cleaned_notes: String = self
            .notes()
            .chars()
            .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
            .filter(|c| !c.is_control())
            .collect();
        let cleaned_notes = cleaned_notes.trim();
        let notes = if cleaned_notes.chars().count() > MAX_NOTES_IN_FILENAME {
            let truncated: String = cleaned_notes.chars().take(MAX_NOTES_IN_FILENAME).collect();
            format!("{}..", truncated)
        } else {
            cleaned_notes.to_string()
        };

        format!(
            "{} {} {:.2}km {} (W{})",
            date_prefix,
            notes,
            self.distance_km(),
            activity,
            self.workout_id
        )
    }

    /// Sort key: newest first, undated last, then by id.
    pub(crate) fn sort_key(&self) -> (std::cmp::Reverse<Option<NaiveDate>>, &str) {
        (std::cmp::Reverse(self.workout_date()), &self.workout_id)
    }
}

/// Extract the workout id from a workout URL such as
/// `https://www.mapmyfitness.com/workout/8675309/`.
pub fn workout_id_from_link(link: &str) -> String {
    link.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Parse dates such as `"Sept. 5, 2023"`, `"Jan. 12, 2024"` or `"March 3, 2021"`.
pub fn parse_workout_date(text: &str) -> Option<NaiveDate> {
    if text.trim().is_empty() {
        return None;
    }
    let cleaned = text.replace("Sept.", "Sep.").replace('.', "");
    let cleaned = cleaned.trim();
    ["%B %d, %Y", "%b %d, %Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cleaned, fmt).ok())
}

/// Read every row of a workout-list CSV, including rows without an id.
pub(crate) fn read_rows(content: &[u8], source_name: &str) -> Result<Vec<WorkoutRecord>> {
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content);

    let headers = reader
        .headers()
        .map_err(|e| SyncError::parse(source_name, e))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| SyncError::parse(source_name, e))?;
        if row.len() > headers.len() {
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            return Err(SyncError::parse(
                source_name,
                format!(
                    "line {} has {} fields, header has {}",
                    line,
                    row.len(),
                    headers.len()
                ),
            ));
        }
        records.push(WorkoutRecord::from_row(headers.iter().zip(row.iter())));
    }
    Ok(records)
}

/// Parse a remote workout-list export. Rows without a workout id are skipped.
pub fn parse_workout_list(content: &[u8], source_name: &str) -> Result<Vec<WorkoutRecord>> {
    let rows = read_rows(content, source_name)?;
    let total = rows.len();
    let records: Vec<WorkoutRecord> = rows
        .into_iter()
        .filter(|r| !r.workout_id.is_empty())
        .collect();
    if records.len() < total {
        warn!(
            "[WorkoutList] Skipped {} rows without a workout id in {}",
            total - records.len(),
            source_name
        );
    }
    Ok(records)
}

/// Serialize records as a workout-list CSV with a stable column order.
pub fn encode_workout_list<'a>(
    records: impl IntoIterator<Item = &'a WorkoutRecord>,
) -> Result<Vec<u8>> {
    let rows: Vec<BTreeMap<String, String>> = records.into_iter().map(|r| r.to_row()).collect();

    let mut columns: Vec<String> = PREFERRED_COLUMNS.iter().map(|c| c.to_string()).collect();
    let extra: BTreeSet<&String> = rows
        .iter()
        .flat_map(|row| row.keys())
        .filter(|k| !PREFERRED_COLUMNS.contains(&k.as_str()))
        .collect();
    columns.extend(extra.into_iter().cloned());

    let mut writer = csv::Writer::from_writer(Vec::new());
    let encode_err = |e: csv::Error| SyncError::parse("workout list", e);
    writer.write_record(&columns).map_err(encode_err)?;
    for row in &rows {
        writer
            .write_record(
                columns
                    .iter()
                    .map(|c| row.get(c).map(String::as_str).unwrap_or("")),
            )
            .map_err(encode_err)?;
    }
    writer
        .into_inner()
        .map_err(|e| SyncError::parse("workout list", e.error().to_string()))
}

/// Atomically write records as a workout-list CSV.
pub fn write_workout_list<'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a WorkoutRecord>,
) -> Result<()> {
    let bytes = encode_workout_list(records)?;
    write_atomically(path, &bytes)
}
