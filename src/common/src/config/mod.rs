use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "wiki-backup.toml";

/// Prefix for environment overrides, e.g. `WIKI_BACKUP__RETENTION__DAYS=14`.
pub const ENV_PREFIX: &str = "WIKI_BACKUP__";

/// Local storage for backup archives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the archives produced by the creator
    pub backup_dir: PathBuf,
    /// File name prefix shared by all archives
    pub artifact_prefix: String,
    /// Archive extension, including the leading dot
    pub artifact_extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("/var/backups/wiki"),
            artifact_prefix: "wiki-backup-".to_string(),
            artifact_extension: ".tar.gz.gpg".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogConfig {
    /// Append-only run log
    pub file: PathBuf,
    /// Mirror every run log line to stdout
    pub echo_stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("/var/log/wiki-backup.log"),
            echo_stdout: true,
        }
    }
}

/// The external executable that exports, compresses and encrypts the wiki.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreatorConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Upper bound for a single creator invocation
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CreatorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/usr/local/bin/wiki-export-backup"),
            args: Vec::new(),
            timeout: Duration::from_secs(2 * 3600),
        }
    }
}

/// Remote store reached through rclone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// rclone executable (resolved through `PATH` when not absolute)
    pub rclone_binary: PathBuf,
    /// Global flags placed before the rclone subcommand (e.g. `--config`)
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Name of the pre-configured rclone remote, without the trailing colon
    pub remote: String,
    /// Folder on the remote receiving the archives
    pub path: String,
    /// Upper bound for a single rclone invocation
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Rolling window defining a "recent" archive for upload and verification
    #[serde(with = "humantime_serde")]
    pub recent_window: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            rclone_binary: PathBuf::from("rclone"),
            extra_args: Vec::new(),
            remote: "gdrive".to_string(),
            path: "wiki-backups".to_string(),
            timeout: Duration::from_secs(3600),
            recent_window: Duration::from_secs(24 * 3600),
        }
    }
}

impl RemoteConfig {
    /// `remote:path` target as understood by rclone.
    pub fn target(&self) -> String {
        let path = self.path.trim_matches('/');
        format!("{}:{}", self.remote, path)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Archives whose age in whole days exceeds this value are deleted.
    ///
    /// Env: WIKI_BACKUP__RETENTION__DAYS
    pub days: u32,

    /// Log what would be deleted without deleting anything.
    ///
    /// Env: WIKI_BACKUP__RETENTION__DRY_RUN
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: 7,
            dry_run: false,
        }
    }
}

/// Guards against two runs sharing the backup directory.
///
/// The lock is an advisory lock held on `<backup_dir>/.wiki-backup.lock` for
/// the whole run; the kernel drops it if the process dies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    pub enabled: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub storage: StorageConfig,
    pub log: LogConfig,
    pub creator: CreatorConfig,
    pub remote: RemoteConfig,
    pub retention: RetentionConfig,
    pub lock: LockConfig,
}

impl Configuration {
    /// Load defaults, then `wiki-backup.toml`, then `WIKI_BACKUP__*` variables.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Same layering as [`Configuration::load`] with an explicit TOML file.
    ///
    /// A missing file is not an error; the defaults and environment still apply.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Reject values that would make a run meaningless or unbounded.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let zero = Duration::from_secs(0);

        if self.storage.backup_dir.as_os_str().is_empty() {
            return Err(ConfigValidationError::Empty("storage.backup_dir"));
        }
        if self.storage.artifact_prefix.is_empty() {
            return Err(ConfigValidationError::Empty("storage.artifact_prefix"));
        }
        if self.storage.artifact_extension.is_empty() {
            return Err(ConfigValidationError::Empty("storage.artifact_extension"));
        }
        if self.log.file.as_os_str().is_empty() {
            return Err(ConfigValidationError::Empty("log.file"));
        }
        if self.creator.program.as_os_str().is_empty() {
            return Err(ConfigValidationError::Empty("creator.program"));
        }
        if self.remote.rclone_binary.as_os_str().is_empty() {
            return Err(ConfigValidationError::Empty("remote.rclone_binary"));
        }
        if self.remote.remote.trim().is_empty() {
            return Err(ConfigValidationError::Empty("remote.remote"));
        }
        if self.remote.remote.contains(':') {
            return Err(ConfigValidationError::InvalidRemoteName(
                self.remote.remote.clone(),
            ));
        }
        if self.retention.days == 0 {
            return Err(ConfigValidationError::InvalidRetentionDays);
        }
        if self.remote.recent_window <= zero {
            return Err(ConfigValidationError::ZeroDuration("remote.recent_window"));
        }
        if self.remote.timeout <= zero {
            return Err(ConfigValidationError::ZeroDuration("remote.timeout"));
        }
        if self.creator.timeout <= zero {
            return Err(ConfigValidationError::ZeroDuration("creator.timeout"));
        }

        Ok(())
    }
}

/// Errors raised by [`Configuration::validate`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("remote name '{0}' must not contain ':' (configure the folder in remote.path)")]
    InvalidRemoteName(String),

    #[error("retention.days must be at least 1")]
    InvalidRetentionDays,

    #[error("{0} must be positive")]
    ZeroDuration(&'static str),
}
