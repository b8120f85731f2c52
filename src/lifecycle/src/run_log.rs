//! Append-only, human-readable record of one run.
//!
//! Each event is written as `<YYYY-MM-DD HH:MM:SS>: <message>` to the log file
//! and, when enabled, echoed to stdout. A run ends with a bare separator line.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use common::config::LogConfig;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const SEPARATOR: &str = "----------------------------------------";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogRecord {
    pub fn line(&self) -> String {
        format!("{}: {}", self.timestamp.format(TIMESTAMP_FORMAT), self.message)
    }
}

#[derive(Debug)]
pub struct RunLog {
    path: Option<PathBuf>,
    file: Option<File>,
    echo: bool,
    records: Vec<LogRecord>,
    separated: bool,
}

impl RunLog {
    /// Open (or create) the log file for appending.
    pub fn open(path: &Path, echo: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open run log {}", path.display()))?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            file: Some(file),
            echo,
            records: Vec::new(),
            separated: false,
        })
    }

    pub fn from_config(config: &LogConfig) -> Result<Self> {
        Self::open(&config.file, config.echo_stdout)
    }

    /// A log that keeps records in memory only.
    pub fn detached(echo: bool) -> Self {
        Self {
            path: None,
            file: None,
            echo,
            records: Vec::new(),
            separated: false,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one timestamped event.
    ///
    /// Write failures are reported through tracing and never abort a run.
    pub fn record(&mut self, message: impl Into<String>) {
        let record = LogRecord {
            timestamp: Local::now(),
            message: message.into(),
        };
        let line = record.line();
        tracing::debug!(target: "lifecycle::run_log", "{}", record.message);
        self.emit(&line);
        self.records.push(record);
    }

    /// Write the trailing separator that closes a run.
    pub fn separator(&mut self) {
        self.emit(SEPARATOR);
        self.separated = true;
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn messages(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.message.as_str()).collect()
    }

    pub fn is_separated(&self) -> bool {
        self.separated
    }

    fn emit(&mut self, line: &str) {
        if self.echo {
            println!("{line}");
        }
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = writeln!(file, "{line}").and_then(|_| file.flush()) {
                tracing::warn!(
                    path = ?self.path,
                    error = %e,
                    "Failed to append to run log"
                );
            }
        }
    }
}
