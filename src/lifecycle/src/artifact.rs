//! Local backup archives and the directory that holds them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::fs;

use common::config::StorageConfig;

const SECONDS_PER_DAY: u64 = 24 * 3600;

/// File name filter shared by local scans and the rclone include rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPattern {
    prefix: String,
    extension: String,
}

impl ArtifactPattern {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        file_name.len() >= self.prefix.len() + self.extension.len()
            && file_name.starts_with(&self.prefix)
            && file_name.ends_with(&self.extension)
    }

    /// Glob form, e.g. `wiki-backup-*.tar.gz.gpg`.
    pub fn glob(&self) -> String {
        format!("{}*{}", self.prefix, self.extension)
    }

    /// Name suggested to the creator for an archive taken at `at`.
    pub fn file_name_for(&self, at: DateTime<Local>) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            at.format("%Y%m%d_%H%M%S"),
            self.extension
        )
    }
}

impl From<&StorageConfig> for ArtifactPattern {
    fn from(config: &StorageConfig) -> Self {
        Self::new(
            config.artifact_prefix.clone(),
            config.artifact_extension.clone(),
        )
    }
}

/// A backup archive found in the local storage directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    /// Modification time, used as the creation timestamp
    pub modified: DateTime<Utc>,
}

impl BackupArtifact {
    /// Age relative to `now`; archives stamped in the future have age zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.modified).to_std().unwrap_or(Duration::ZERO)
    }

    /// Age truncated to whole days.
    pub fn age_in_days(&self, now: DateTime<Utc>) -> u64 {
        self.age(now).as_secs() / SECONDS_PER_DAY
    }

    /// Whether the archive falls inside the rolling window ending at `now`.
    pub fn is_recent(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.age(now) < window
    }
}

/// The local storage directory, exclusively owned by one run.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    pattern: ArtifactPattern,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, pattern: ArtifactPattern) -> Self {
        Self {
            dir: dir.into(),
            pattern,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.backup_dir.clone(), ArtifactPattern::from(config))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pattern(&self) -> &ArtifactPattern {
        &self.pattern
    }

    /// Create the storage directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create backup directory {}", self.dir.display()))
    }

    /// All archives matching the pattern, newest first.
    ///
    /// A missing directory yields an empty list.
    pub async fn scan(&self) -> Result<Vec<BackupArtifact>> {
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read backup directory {}", self.dir.display()))?;

        let mut artifacts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read backup directory entry")?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !self.pattern.matches(&file_name) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    // Deleted between read_dir and stat
                    tracing::debug!(file = %file_name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata
                .modified()
                .with_context(|| format!("No modification time for {file_name}"))?;

            artifacts.push(BackupArtifact {
                path: entry.path(),
                file_name,
                size_bytes: metadata.len(),
                modified: DateTime::<Utc>::from(modified),
            });
        }

        artifacts.sort_by(|a, b| b.modified.cmp(&a.modified).then(a.file_name.cmp(&b.file_name)));
        Ok(artifacts)
    }

    /// Archives modified within `window` of `now`.
    pub async fn recent(&self, now: DateTime<Utc>, window: Duration) -> Result<Vec<BackupArtifact>> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter(|artifact| artifact.is_recent(now, window))
            .collect())
    }

    pub async fn delete(&self, artifact: &BackupArtifact) -> Result<()> {
        fs::remove_file(&artifact.path)
            .await
            .with_context(|| format!("Failed to delete {}", artifact.path.display()))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{days, write_aged};
    use super::*;
    use chrono::TimeZone;

    fn pattern() -> ArtifactPattern {
        ArtifactPattern::new("wiki-backup-", ".tar.gz.gpg")
    }

    #[test]
    fn test_pattern_matching() {
        let pattern = pattern();
        assert!(pattern.matches("wiki-backup-20261016_031500.tar.gz.gpg"));
        assert!(!pattern.matches("wiki-backup-20261016_031500.tar.gz"));
        assert!(!pattern.matches("other-20261016.tar.gz.gpg"));
        assert!(!pattern.matches(".wiki-backup.lock"));
        // Prefix and extension must not overlap
        assert!(!ArtifactPattern::new("a.gpg", ".gpg").matches("a.gpg"));
        assert_eq!(pattern.glob(), "wiki-backup-*.tar.gz.gpg");
    }

    #[test]
    fn test_file_name_for_timestamp() {
        let at = Local.with_ymd_and_hms(2026, 10, 16, 3, 15, 0).unwrap();
        let name = pattern().file_name_for(at);
        assert_eq!(name, "wiki-backup-20261016_031500.tar.gz.gpg");
        assert!(pattern().matches(&name));
    }

    #[test]
    fn test_age_in_days_truncates() {
        let now = Utc::now();
        let artifact = |age: Duration| BackupArtifact {
            path: PathBuf::from("x"),
            file_name: "x".into(),
            size_bytes: 0,
            modified: now - chrono::Duration::from_std(age).unwrap(),
        };

        assert_eq!(artifact(days(7) + Duration::from_secs(23 * 3600)).age_in_days(now), 7);
        assert_eq!(artifact(days(8)).age_in_days(now), 8);
        assert_eq!(artifact(Duration::from_secs(3600)).age_in_days(now), 0);

        let future = BackupArtifact {
            modified: now + chrono::Duration::minutes(5),
            ..artifact(Duration::ZERO)
        };
        assert_eq!(future.age(now), Duration::ZERO);
        assert!(future.is_recent(now, Duration::from_secs(24 * 3600)));
    }

    #[tokio::test]
    async fn test_scan_filters_and_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        write_aged(dir.path(), "wiki-backup-old.tar.gz.gpg", now, days(3));
        write_aged(dir.path(), "wiki-backup-new.tar.gz.gpg", now, Duration::from_secs(60));
        write_aged(dir.path(), "notes.txt", now, Duration::from_secs(60));
        std::fs::create_dir(dir.path().join("wiki-backup-dir.tar.gz.gpg")).unwrap();

        let store = ArtifactStore::new(dir.path(), pattern());
        let artifacts = store.scan().await.unwrap();

        let names: Vec<_> = artifacts.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, vec!["wiki-backup-new.tar.gz.gpg", "wiki-backup-old.tar.gz.gpg"]);
        assert!(artifacts[0].size_bytes > 0);
    }

    #[tokio::test]
    async fn test_recent_uses_rolling_window() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        write_aged(dir.path(), "wiki-backup-a.tar.gz.gpg", now, Duration::from_secs(23 * 3600));
        write_aged(dir.path(), "wiki-backup-b.tar.gz.gpg", now, Duration::from_secs(25 * 3600));

        let store = ArtifactStore::new(dir.path(), pattern());
        let recent = store
            .recent(now, Duration::from_secs(24 * 3600))
            .await
            .unwrap();

        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].file_name, "wiki-backup-a.tar.gz.gpg");
    }

    #[tokio::test]
    async fn test_missing_directory_scans_empty_and_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("nested/backups"), pattern());

        assert!(store.scan().await.unwrap().is_empty());
        store.ensure_dir().await.unwrap();
        assert!(store.dir().is_dir());
    }
}
