//! Backup Lifecycle Orchestrator
//!
//! Sequences one run through the states
//! `Init → Cleanup → Create → Upload → Verify → Done(success|error)`.
//!
//! ## Guarantees
//!
//! - The first fatal error skips every remaining phase and jumps to `Done(error)`
//! - Cleanup and verification problems are logged as warnings and never fail a run
//! - Exactly one summary line is written, followed by the run separator
//! - "Recent" and "expired" are both measured from the invocation timestamp

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tracing::{debug, info, warn};

use common::config::Configuration;

use crate::artifact::{ArtifactStore, BackupArtifact};
use crate::creator::{BackupCreator, CreateRequest, ScriptCreator};
use crate::error::LifecycleError;
use crate::lock::RunLock;
use crate::remote::{RcloneRemote, RemoteInventory, RemoteStore, UploadRequest};
use crate::retention::{CleanupResult, RetentionCleaner};
use crate::run_log::RunLog;

pub const START_MESSAGE: &str = "Starting wiki backup run";
pub const SUMMARY_PREFIX: &str = "Backup run completed with status: ";

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Cleanup,
    Create,
    Upload,
    Verify,
    Done(RunStatus),
}

/// Knobs that are not owned by a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Rolling window that makes an archive eligible for upload
    pub recent_window: Duration,
    /// Hold the run lock on the backup directory for the whole run
    pub use_lock: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            recent_window: Duration::from_secs(24 * 3600),
            use_lock: true,
        }
    }
}

impl From<&Configuration> for OrchestratorSettings {
    fn from(config: &Configuration) -> Self {
        Self {
            recent_window: config.remote.recent_window,
            use_lock: config.lock.enabled,
        }
    }
}

/// Everything a run produced, for the exit code and for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    /// The fatal error that ended the run, if any
    pub error: Option<LifecycleError>,
    /// States visited, in order, ending with `Done`
    pub phases: Vec<Phase>,
    pub cleanup: Option<CleanupResult>,
    /// Archive path suggested to the creator
    pub requested_artifact: Option<PathBuf>,
    pub uploaded: Vec<BackupArtifact>,
    pub inventory: Option<RemoteInventory>,
    pub verify_warning: Option<LifecycleError>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            status: RunStatus::Error,
            error: None,
            phases: Vec::new(),
            cleanup: None,
            requested_artifact: None,
            uploaded: Vec::new(),
            inventory: None,
            verify_warning: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// 0 on success, 1 on any fatal failure.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            RunStatus::Success => 0,
            RunStatus::Error => 1,
        }
    }
}

pub struct Orchestrator {
    store: ArtifactStore,
    cleaner: RetentionCleaner,
    creator: Box<dyn BackupCreator>,
    remote: Box<dyn RemoteStore>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: ArtifactStore,
        cleaner: RetentionCleaner,
        creator: Box<dyn BackupCreator>,
        remote: Box<dyn RemoteStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            cleaner,
            creator,
            remote,
            settings,
        }
    }

    /// Build the production orchestrator (export script + rclone).
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Config`] if the configuration is invalid.
    pub fn from_config(config: &Configuration) -> Result<Self, LifecycleError> {
        config
            .validate()
            .map_err(|e| LifecycleError::Config(e.to_string()))?;

        Ok(Self::new(
            ArtifactStore::from_config(&config.storage),
            RetentionCleaner::from_config(&config.retention),
            Box::new(ScriptCreator::from_config(&config.creator)),
            Box::new(RcloneRemote::from_config(&config.remote)),
            OrchestratorSettings::from(config),
        ))
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Record a run that failed before the orchestrator could be built.
    pub fn record_startup_failure(log: &mut RunLog, error: LifecycleError) -> RunReport {
        log.record(START_MESSAGE);
        log.record(error.log_line());

        let mut report = RunReport::new();
        report.phases = vec![Phase::Init, Phase::Done(RunStatus::Error)];
        report.error = Some(error);
        Self::summarize(log, &report);
        report
    }

    pub async fn run(&self, log: &mut RunLog) -> RunReport {
        self.run_at(Utc::now(), log).await
    }

    /// Execute one run with `now` as the invocation timestamp.
    pub async fn run_at(&self, now: DateTime<Utc>, log: &mut RunLog) -> RunReport {
        log.record(START_MESSAGE);
        info!(remote = %self.remote.target(), dir = %self.store.dir().display(), "Backup run started");

        let mut report = RunReport::new();
        let mut held_lock: Option<RunLock> = None;
        let mut phase = Phase::Init;

        loop {
            report.phases.push(phase);

            let next = match phase {
                Phase::Init => self.check_prerequisites(log).await.map(|lock| {
                    held_lock = lock;
                    Phase::Cleanup
                }),
                Phase::Cleanup => {
                    report.cleanup = self.cleanup(now, log).await;
                    Ok(Phase::Create)
                }
                Phase::Create => self.create(now, log).await.map(|path| {
                    report.requested_artifact = Some(path);
                    Phase::Upload
                }),
                Phase::Upload => self.upload(now, log).await.map(|uploaded| {
                    report.uploaded = uploaded;
                    Phase::Verify
                }),
                Phase::Verify => {
                    self.verify(log, &mut report).await;
                    Ok(Phase::Done(RunStatus::Success))
                }
                Phase::Done(status) => {
                    report.status = status;
                    break;
                }
            };

            phase = match next {
                Ok(next) => next,
                Err(error) => {
                    warn!(phase = ?phase, error = %error, "Backup run aborted");
                    log.record(error.log_line());
                    report.error = Some(error);
                    Phase::Done(RunStatus::Error)
                }
            };
        }

        Self::summarize(log, &report);
        drop(held_lock);
        report
    }

    /// Init: creator present, remote configured, directory present, lock held.
    async fn check_prerequisites(&self, log: &mut RunLog) -> Result<Option<RunLock>, LifecycleError> {
        self.creator.check().await?;
        self.remote.check_configured().await?;

        self.store
            .ensure_dir()
            .await
            .map_err(|e| LifecycleError::Config(format!("{e:#}")))?;

        let lock = if self.settings.use_lock {
            let lock = RunLock::acquire(self.store.dir())?;
            debug!(path = %lock.path().display(), "Run lock acquired");
            Some(lock)
        } else {
            None
        };

        log.record(format!(
            "Prerequisites satisfied (creator {}, remote {})",
            self.creator.describe(),
            self.remote.target()
        ));
        Ok(lock)
    }

    /// Cleanup: best effort, never fails the run.
    async fn cleanup(&self, now: DateTime<Utc>, log: &mut RunLog) -> Option<CleanupResult> {
        let days = self.cleaner.policy().days();
        let mode = if self.cleaner.dry_run() { " (dry run)" } else { "" };
        log.record(format!("Cleaning up backups older than {days} days{mode}"));

        let result = match self.cleaner.cleanup(&self.store, now).await {
            Ok(result) => result,
            Err(e) => {
                log.record(format!("WARNING: Cleanup skipped: {e:#}"));
                return None;
            }
        };

        for (path, error) in &result.failed {
            log.record(format!(
                "WARNING: Could not delete {}: {error}",
                path.display()
            ));
        }

        if result.dry_run {
            log.record(format!(
                "Cleanup (dry run): {} backup(s) would be deleted",
                result.deleted.len()
            ));
        } else {
            log.record(format!("Cleanup: deleted {} old backup(s)", result.deleted.len()));
        }

        Some(result)
    }

    /// Create: run the export; any failure aborts.
    async fn create(&self, now: DateTime<Utc>, log: &mut RunLog) -> Result<PathBuf, LifecycleError> {
        let file_name = self
            .store
            .pattern()
            .file_name_for(now.with_timezone(&Local));
        let request = CreateRequest {
            backup_dir: self.store.dir().to_path_buf(),
            artifact_path: self.store.dir().join(file_name),
        };

        log.record(format!("Creating backup with {}", self.creator.describe()));
        self.creator.create(&request).await?;
        log.record("Backup created successfully");

        Ok(request.artifact_path)
    }

    /// Upload: send every recent archive; nothing recent is fatal.
    async fn upload(
        &self,
        now: DateTime<Utc>,
        log: &mut RunLog,
    ) -> Result<Vec<BackupArtifact>, LifecycleError> {
        let window = self.settings.recent_window;
        let recent = self
            .store
            .recent(now, window)
            .await
            .map_err(|e| LifecycleError::Upload(format!("{e:#}")))?;

        if recent.is_empty() {
            return Err(LifecycleError::NoRecentArtifact { window });
        }

        log.record(format!(
            "Uploading {} recent backup(s) to {}",
            recent.len(),
            self.remote.target()
        ));

        let request = UploadRequest {
            source_dir: self.store.dir().to_path_buf(),
            include: self.store.pattern().glob(),
            max_age: window,
        };
        self.remote.upload(&request).await?;

        log.record("Upload completed successfully");
        Ok(recent)
    }

    /// Verify: list the remote; failures are warnings only.
    async fn verify(&self, log: &mut RunLog, report: &mut RunReport) {
        let window = self.settings.recent_window;

        match self.remote.list_recent(window).await {
            Ok(inventory) => {
                log.record(format!(
                    "Verification: {} file(s) modified within {} on {}",
                    inventory.len(),
                    humantime::format_duration(window),
                    self.remote.target()
                ));
                if !inventory.is_empty() {
                    log.record(format!("Remote files: {}", inventory.names().join(", ")));
                }

                let missing: Vec<&str> = report
                    .uploaded
                    .iter()
                    .map(|a| a.file_name.as_str())
                    .filter(|name| !inventory.contains(name))
                    .collect();
                if !missing.is_empty() {
                    log.record(format!(
                        "WARNING: Uploaded file(s) missing from remote listing: {}",
                        missing.join(", ")
                    ));
                }

                report.inventory = Some(inventory);
            }
            Err(error) => {
                let error = if error.is_fatal() {
                    LifecycleError::VerifyWarning(error.to_string())
                } else {
                    error
                };
                log.record(error.log_line());
                report.verify_warning = Some(error);
            }
        }
    }

    fn summarize(log: &mut RunLog, report: &RunReport) {
        info!(
            status = %report.status,
            phases = report.phases.len(),
            uploaded = report.uploaded.len(),
            "Backup run finished"
        );
        log.record(format!("{SUMMARY_PREFIX}{}", report.status));
        log.separator();
    }
}
