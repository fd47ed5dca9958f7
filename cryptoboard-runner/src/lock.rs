//! Run-level lock file.
//!
//! Two overlapping pipeline runs against the same destination would race on
//! the full-replace publish. A run that is configured with a lock path takes
//! the lock before extraction and releases it when the guard drops.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another run holds the lock at {0}")]
    Held(PathBuf),
    #[error("failed to take run lock: {0}")]
    Io(String),
}

/// Exclusive lock held for the lifetime of the guard.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create the lock file, failing if it already exists.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Io(e.to_string()))?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LockError::Held(path.to_path_buf()))
            }
            Err(e) => return Err(LockError::Io(format!("{}: {e}", path.display()))),
        };
        // Owner pid, for humans inspecting a stale lock.
        let _ = writeln!(file, "{}", std::process::id());

        debug!(path = %path.display(), "run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}
