//! Single-writer repository lock.

use crate::error::{Error, Result};
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Name of the lock file under the repository root.
pub const LOCK_FILE: &str = "repo.lock";

/// An exclusive advisory lock on `root/repo.lock`.
///
/// Every command that mutates objects or registries holds one for its whole run.
/// The lock is released when the guard is dropped (the OS drops it with the file
/// descriptor, including when the process dies).
#[derive(Debug)]
pub struct RepoLock {
    _file: File,
    path: PathBuf,
}

impl RepoLock {
    /// Block until the repository lock is held.
    pub fn acquire(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::from_io(&path, e))?;

        tracing::debug!(lock = %path.display(), "waiting for repository lock");
        file.lock_exclusive()?;
        tracing::debug!(lock = %path.display(), "acquired repository lock");

        Ok(Self { _file: file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        tracing::debug!(lock = %self.path.display(), "released repository lock");
    }
}
