//! Backup generation through an external executable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use common::config::CreatorConfig;

use crate::error::LifecycleError;
use crate::process::run_with_timeout;

/// Environment variable naming the storage directory for the creator.
pub const ENV_BACKUP_DIR: &str = "WIKI_BACKUP_DIR";
/// Environment variable carrying the suggested archive path.
pub const ENV_BACKUP_ARTIFACT: &str = "WIKI_BACKUP_ARTIFACT";

/// What the orchestrator asks the creator to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub backup_dir: PathBuf,
    pub artifact_path: PathBuf,
}

/// Produces one backup archive per call.
#[async_trait]
pub trait BackupCreator: Send + Sync {
    /// Human-readable name for log lines.
    fn describe(&self) -> String;

    /// Fail with [`LifecycleError::Config`] when the mechanism is unavailable.
    async fn check(&self) -> Result<(), LifecycleError>;

    /// Fail with [`LifecycleError::Creation`] when no archive could be made.
    async fn create(&self, request: &CreateRequest) -> Result<(), LifecycleError>;
}

/// Runs the configured export script (which does the tar + gpg work).
#[derive(Debug, Clone)]
pub struct ScriptCreator {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ScriptCreator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &CreatorConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.timeout)
    }
}

#[async_trait]
impl BackupCreator for ScriptCreator {
    fn describe(&self) -> String {
        self.program.display().to_string()
    }

    async fn check(&self) -> Result<(), LifecycleError> {
        let metadata = tokio::fs::metadata(&self.program).await.map_err(|e| {
            LifecycleError::Config(format!(
                "backup script {} is not available: {e}",
                self.program.display()
            ))
        })?;

        if !metadata.is_file() {
            return Err(LifecycleError::Config(format!(
                "backup script {} is not a regular file",
                self.program.display()
            )));
        }

        if !is_executable(&self.program, &metadata) {
            return Err(LifecycleError::Config(format!(
                "backup script {} is not executable",
                self.program.display()
            )));
        }

        Ok(())
    }

    async fn create(&self, request: &CreateRequest) -> Result<(), LifecycleError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(ENV_BACKUP_DIR, &request.backup_dir)
            .env(ENV_BACKUP_ARTIFACT, &request.artifact_path);

        let output = run_with_timeout(command, self.timeout)
            .await
            .map_err(|e| LifecycleError::Creation(e.to_string()))?;

        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            tracing::debug!(target: "lifecycle::creator", "{line}");
        }

        output
            .into_success(&self.describe())
            .map(|_| ())
            .map_err(|e| LifecycleError::Creation(e.to_string()))
    }
}

#[cfg(unix)]
fn is_executable(_path: &Path, metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(path: &Path, _metadata: &std::fs::Metadata) -> bool {
    path.extension().is_some()
}
