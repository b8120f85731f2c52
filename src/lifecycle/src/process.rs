//! Bounded execution of external tools.
//!
//! Every subprocess (backup generation, rclone) goes through [`run_with_timeout`]
//! so that a hung tool cannot stall a run forever. The child is spawned with
//! `kill_on_drop`, which terminates it when the timeout future is dropped.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Longest stderr excerpt carried in error messages.
const STDERR_EXCERPT_CHARS: usize = 500;

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Tail of stderr suitable for a single log line.
    pub fn stderr_excerpt(&self) -> String {
        excerpt(&self.stderr)
    }

    /// Turn a non-zero exit into [`ProcessError::Failed`].
    pub fn into_success(self, program: &str) -> Result<CommandOutput, ProcessError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProcessError::Failed {
                program: program.to_string(),
                status: self.status,
                stderr: self.stderr_excerpt(),
            })
        }
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {}", humantime::format_duration(*timeout))]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} exited with {status}{}", stderr_suffix(stderr))]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_EXCERPT_CHARS {
        return trimmed.replace('\n', " | ");
    }
    let tail: String = trimmed.chars().skip(count - STDERR_EXCERPT_CHARS).collect();
    format!("...{}", tail.replace('\n', " | "))
}

/// Run `command` to completion, capturing its output, or kill it after `timeout`.
///
/// A non-zero exit status is returned as a normal [`CommandOutput`]; callers
/// decide whether that is fatal.
pub async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(program = %program, timeout = ?timeout, "Spawning subprocess");

    let child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ProcessError::Wait {
            program: program.clone(),
            source,
        })?,
        Err(_) => {
            tracing::warn!(program = %program, timeout = ?timeout, "Subprocess timed out, killing it");
            return Err(ProcessError::TimedOut { program, timeout });
        }
    };

    tracing::debug!(program = %program, status = %output.status, "Subprocess finished");

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
