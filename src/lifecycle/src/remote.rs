//! Remote store access through rclone.
//!
//! The orchestrator only needs three things from the remote: a configuration
//! check, a filtered upload of the backup directory, and a listing of what
//! arrived recently. [`RcloneRemote`] maps them to `rclone listremotes`,
//! `rclone copy` and `rclone lsl`.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::process::Command;

use common::config::RemoteConfig;

use crate::error::LifecycleError;
use crate::process::run_with_timeout;

/// One file on the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size_bytes: u64,
    /// As reported by the remote, in the remote's local time
    pub modified: Option<NaiveDateTime>,
}

/// Snapshot of recent remote files taken during verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInventory {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<RemoteEntry>,
}

impl RemoteInventory {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }
}

/// Upload request for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub source_dir: PathBuf,
    /// Include filter in glob form
    pub include: String,
    /// Only files modified within this window are sent
    pub max_age: Duration,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `remote:path` as shown in log lines.
    fn target(&self) -> String;

    /// Fail with [`LifecycleError::Config`] when the remote is not set up.
    async fn check_configured(&self) -> Result<(), LifecycleError>;

    /// Fail with [`LifecycleError::Upload`] when the sync tool fails.
    async fn upload(&self, request: &UploadRequest) -> Result<(), LifecycleError>;

    /// Fail with [`LifecycleError::VerifyWarning`] when the listing fails.
    async fn list_recent(&self, max_age: Duration) -> Result<RemoteInventory, LifecycleError>;
}

/// [`RemoteStore`] backed by the rclone command line tool.
#[derive(Debug, Clone)]
pub struct RcloneRemote {
    binary: PathBuf,
    extra_args: Vec<String>,
    remote: String,
    path: String,
    timeout: Duration,
}

impl RcloneRemote {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            binary: config.rclone_binary.clone(),
            extra_args: config.extra_args.clone(),
            remote: config.remote.clone(),
            path: config.path.trim_matches('/').to_string(),
            timeout: config.timeout,
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command.args(&self.extra_args);
        command.args(args);
        command
    }

    fn program(&self) -> String {
        self.binary.display().to_string()
    }
}

/// rclone accepts plain seconds for duration flags.
fn rclone_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs().max(1))
}

#[async_trait]
impl RemoteStore for RcloneRemote {
    fn target(&self) -> String {
        format!("{}:{}", self.remote, self.path)
    }

    async fn check_configured(&self) -> Result<(), LifecycleError> {
        if self.remote.trim().is_empty() {
            return Err(LifecycleError::Config("no rclone remote configured".into()));
        }

        let output = run_with_timeout(self.command(["listremotes"]), self.timeout)
            .await
            .and_then(|output| output.into_success(&self.program()))
            .map_err(|e| LifecycleError::Config(format!("cannot query rclone remotes: {e}")))?;

        if remotes_contain(&output.stdout, &self.remote) {
            Ok(())
        } else {
            Err(LifecycleError::Config(format!(
                "rclone remote '{}' is not configured",
                self.remote
            )))
        }
    }

    async fn upload(&self, request: &UploadRequest) -> Result<(), LifecycleError> {
        let mut args: Vec<OsString> = vec!["copy".into(), request.source_dir.clone().into_os_string()];
        args.push(self.target().into());
        args.push("--include".into());
        args.push(request.include.clone().into());
        args.push("--max-age".into());
        args.push(rclone_duration(request.max_age).into());

        run_with_timeout(self.command(args), self.timeout)
            .await
            .and_then(|output| output.into_success(&self.program()))
            .map(|_| ())
            .map_err(|e| LifecycleError::Upload(e.to_string()))
    }

    async fn list_recent(&self, max_age: Duration) -> Result<RemoteInventory, LifecycleError> {
        let taken_at = Utc::now();
        let args = vec![
            "lsl".to_string(),
            self.target(),
            "--max-age".to_string(),
            rclone_duration(max_age),
        ];

        let output = run_with_timeout(self.command(args), self.timeout)
            .await
            .and_then(|output| output.into_success(&self.program()))
            .map_err(|e| LifecycleError::VerifyWarning(e.to_string()))?;

        Ok(RemoteInventory {
            taken_at,
            entries: parse_lsl(&output.stdout),
        })
    }
}

/// Whether `listremotes` output (one `name:` per line) contains `remote`.
pub fn remotes_contain(listing: &str, remote: &str) -> bool {
    listing
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_suffix(':'))
        .any(|name| name == remote)
}

/// Parse `rclone lsl` output: `<size> <date> <time> <name>` per line.
///
/// Names may contain spaces; malformed lines are skipped.
pub fn parse_lsl(listing: &str) -> Vec<RemoteEntry> {
    listing.lines().filter_map(parse_lsl_line).collect()
}

fn parse_lsl_line(line: &str) -> Option<RemoteEntry> {
    let (size, rest) = line.trim_start().split_once(' ')?;
    let size_bytes = size.parse().ok()?;
    let (date, rest) = rest.trim_start().split_once(' ')?;
    let (time, name) = rest.trim_start().split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let modified = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S%.f").ok();

    Some(RemoteEntry {
        name: name.to_string(),
        size_bytes,
        modified,
    })
}
