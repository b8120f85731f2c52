//! Retention predicate for local archives.

use chrono::{DateTime, Utc};

use common::config::RetentionConfig;

use crate::artifact::BackupArtifact;

/// Keeps archives for a number of whole days.
///
/// An archive is expired once its age, truncated to whole days, is strictly
/// greater than `days`. With `days = 7` an archive aged 7 days 23 hours is
/// kept and one aged 8 days is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    days: u32,
}

impl RetentionPolicy {
    pub fn new(days: u32) -> Self {
        Self { days }
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn is_expired(&self, artifact: &BackupArtifact, now: DateTime<Utc>) -> bool {
        artifact.age_in_days(now) > u64::from(self.days)
    }

    /// Split `artifacts` into (expired, retained), preserving order.
    pub fn partition(
        &self,
        artifacts: Vec<BackupArtifact>,
        now: DateTime<Utc>,
    ) -> (Vec<BackupArtifact>, Vec<BackupArtifact>) {
        artifacts
            .into_iter()
            .partition(|artifact| self.is_expired(artifact, now))
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(RetentionConfig::default().days)
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self::new(config.days)
    }
}
