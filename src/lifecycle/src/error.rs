use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Message recorded when the upload phase finds nothing to send.
pub const NO_RECENT_ARTIFACT_MESSAGE: &str = "No recent backup files found to upload";

/// Failures of a backup run, one variant per phase outcome.
///
/// Every variant except [`LifecycleError::VerifyWarning`] is fatal and ends the
/// run with status `error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// A prerequisite is missing; raised before any phase runs.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another run holds the lock on the backup directory.
    #[error("Another backup run holds the lock {}", lock_path.display())]
    AlreadyRunning { lock_path: PathBuf },

    /// The backup-generation executable failed.
    #[error("Backup creation failed: {0}")]
    Creation(String),

    /// No archive was modified within the recent window.
    #[error("No recent backup files found to upload (window {})", humantime::format_duration(*window))]
    NoRecentArtifact { window: Duration },

    /// The sync tool failed to upload.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Remote listing failed after a successful upload.
    #[error("Could not verify remote files: {0}")]
    VerifyWarning(String),
}

impl LifecycleError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LifecycleError::VerifyWarning(_))
    }

    /// Run log line describing this error.
    pub fn log_line(&self) -> String {
        match self {
            LifecycleError::NoRecentArtifact { .. } => {
                format!("WARNING: {NO_RECENT_ARTIFACT_MESSAGE}")
            }
            LifecycleError::VerifyWarning(_) => format!("WARNING: {self}"),
            _ => format!("ERROR: {self}"),
        }
    }
}
