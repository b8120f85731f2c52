//! Exclusive run lock on the backup directory.
//!
//! The lock is an advisory `flock` on `<backup_dir>/.wiki-backup.lock`, held
//! for as long as the [`RunLock`] lives. The kernel releases it when the
//! process exits, so a crashed run never blocks the next one. The file is
//! unlinked on drop; a run that locked an already unlinked file notices the
//! inode mismatch and retries on the new file.
//!
//! On non-Unix platforms the file is created but not locked.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::LifecycleError;

pub const LOCK_FILE_NAME: &str = ".wiki-backup.lock";

/// Attempts before giving up when the lock file keeps being replaced.
const MAX_ATTEMPTS: usize = 8;

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(LOCK_FILE_NAME)
    }

    /// Take the lock in `dir` without blocking.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::AlreadyRunning`] if another run holds it,
    /// [`LifecycleError::Config`] if the lock file cannot be opened.
    pub fn acquire(dir: &Path) -> Result<Self, LifecycleError> {
        let path = Self::path_in(dir);

        for _ in 0..MAX_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| io_error("open", &path, e))?;

            match try_lock_exclusive(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Err(LifecycleError::AlreadyRunning { lock_path: path });
                }
                Err(e) => return Err(io_error("lock", &path, e)),
            }

            // The previous holder unlinked the file between our open and lock
            if !is_current_file(&file, &path) {
                tracing::debug!(path = %path.display(), "Run lock file was replaced, retrying");
                continue;
            }

            let mut lock = Self { path, file };
            lock.write_owner()
                .map_err(|e| io_error("write", &lock.path, e))?;
            return Ok(lock);
        }

        Err(LifecycleError::AlreadyRunning { lock_path: path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_owner(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        writeln!(self.file, "pid={}", std::process::id())?;
        writeln!(self.file, "started={}", Utc::now().to_rfc3339())?;
        self.file.flush()
    }
}

fn io_error(action: &str, path: &Path, e: io::Error) -> LifecycleError {
    LifecycleError::Config(format!("cannot {action} lock file {}: {e}", path.display()))
}

impl Drop for RunLock {
    // Unlink while the lock is still held; closing `file` afterwards releases it
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove run lock");
        }
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor belongs to `file`, which outlives the call
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn is_current_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(on_disk)) => held.dev() == on_disk.dev() && held.ino() == on_disk.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_current_file(_file: &File, path: &Path) -> bool {
    path.exists()
}
