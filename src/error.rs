//! Unified error handling for workout-sync.
//!
//! Failures fall into two groups. Per-workout failures (a download, a parse,
//! a missing track file) are caught by the sync engine and the map batch
//! builder, recorded on that single workout and never abort the run.
//! Whole-run failures (authentication, remote list fetch, a corrupt workout
//! table) abort before anything is persisted.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for workout-sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote unreachable, timed out or answered with an unexpected status.
    #[error("Network error{}: {message}", status_suffix(.status_code))]
    Network {
        message: String,
        status_code: Option<u16>,
    },

    /// Login rejected or credentials unavailable.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The remote has no track for this workout.
    #[error("Workout '{0}' not found on remote")]
    NotFound(String),

    /// Malformed track file or workout list.
    #[error("Failed to parse {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    /// The persisted workout table cannot be read back.
    #[error("Workout table '{}' is corrupt: {message}", .path.display())]
    StoreCorrupt { path: PathBuf, message: String },

    /// A record claims a track file that does not exist or is empty.
    #[error("Workout '{workout_id}' track file '{}' is missing or empty", .path.display())]
    Integrity { workout_id: String, path: PathBuf },

    /// Track has too few points to form a line.
    #[error("Workout '{workout_id}' has {point_count} points, minimum {minimum_required} required")]
    InsufficientPoints {
        workout_id: String,
        point_count: usize,
        minimum_required: usize,
    },

    /// The remote returned zero bytes for a track.
    #[error("Download for workout '{0}' was empty")]
    EmptyDownload(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure.
    #[error("I/O error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code
        .map(|code| format!(" ({})", code))
        .unwrap_or_default()
}

impl SyncError {
    /// Build a closure that wraps an `io::Error` with the path it concerns.
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> SyncError {
        let path = path.into();
        move |source| SyncError::Io { path, source }
    }

    /// Build a parse error for the named source.
    pub fn parse(source_name: impl Into<String>, message: impl ToString) -> SyncError {
        SyncError::Parse {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Errors confined to one workout; the batch continues past them.
    pub fn is_per_workout(&self) -> bool {
        matches!(
            self,
            SyncError::NotFound(_)
                | SyncError::Parse { .. }
                | SyncError::Integrity { .. }
                | SyncError::InsufficientPoints { .. }
                | SyncError::EmptyDownload(_)
                | SyncError::Network { .. }
                | SyncError::Io { .. }
        )
    }

    /// Errors that may go away by re-running the sync.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { status_code, .. } => {
                status_code.map_or(true, |code| code == 429 || code >= 500)
            }
            SyncError::EmptyDownload(_) | SyncError::Integrity { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for workout-sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
