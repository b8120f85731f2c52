//! Best-effort deletion of expired archives.
//!
//! Every expired archive is attempted even if an earlier deletion fails;
//! failures are collected in the result instead of aborting the pass.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use common::config::RetentionConfig;

use super::policy::RetentionPolicy;
use crate::artifact::{ArtifactStore, BackupArtifact};

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    /// Archives inspected
    pub evaluated: usize,
    /// Archives removed (or that would be removed in dry-run mode)
    pub deleted: Vec<PathBuf>,
    /// Archives kept because they are within the retention window
    pub retained: usize,
    /// Deletions that failed, with the error message
    pub failed: Vec<(PathBuf, String)>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct RetentionCleaner {
    policy: RetentionPolicy,
    dry_run: bool,
}

impl RetentionCleaner {
    pub fn new(policy: RetentionPolicy, dry_run: bool) -> Self {
        Self { policy, dry_run }
    }

    pub fn from_config(config: &RetentionConfig) -> Self {
        Self::new(RetentionPolicy::from(config), config.dry_run)
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Delete every archive in `store` expired at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory cannot be scanned. Individual
    /// deletion failures are reported in [`CleanupResult::failed`].
    pub async fn cleanup(&self, store: &ArtifactStore, now: DateTime<Utc>) -> Result<CleanupResult> {
        let artifacts = store
            .scan()
            .await
            .context("Failed to scan backup directory for expired archives")?;
        let evaluated = artifacts.len();
        let (expired, retained) = self.policy.partition(artifacts, now);

        info!(
            dir = %store.dir().display(),
            evaluated,
            expired = expired.len(),
            retention_days = self.policy.days(),
            dry_run = self.dry_run,
            "Evaluated local archives for retention"
        );

        let mut result = CleanupResult {
            evaluated,
            retained: retained.len(),
            dry_run: self.dry_run,
            ..Default::default()
        };
        self.delete_expired(store, expired, now, &mut result).await;

        Ok(result)
    }

    /// Attempt every archive in `expired`, recording each outcome in `result`.
    async fn delete_expired(
        &self,
        store: &ArtifactStore,
        expired: Vec<BackupArtifact>,
        now: DateTime<Utc>,
        result: &mut CleanupResult,
    ) {
        for artifact in expired {
            if self.dry_run {
                info!(
                    file = %artifact.file_name,
                    age_days = artifact.age_in_days(now),
                    "Dry run: would delete expired archive"
                );
                result.deleted.push(artifact.path);
                continue;
            }

            match store.delete(&artifact).await {
                Ok(()) => {
                    info!(
                        file = %artifact.file_name,
                        age_days = artifact.age_in_days(now),
                        "Deleted expired archive"
                    );
                    result.deleted.push(artifact.path);
                }
                Err(e) => {
                    warn!(file = %artifact.file_name, error = %e, "Failed to delete expired archive");
                    result.failed.push((artifact.path, format!("{e:#}")));
                }
            }
        }
    }
}
