//! RAII lock guard implementation.

use super::registry::HeldLocks;
use crate::error::{Result, SpeakError};
use fs2::FileExt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// RAII guard for a held coordination lock.
///
/// Owns the locked file descriptor. When dropped, the lock file is removed
/// (best-effort) while the lock is still held, then the lock is released.
/// If the process dies without running this, the OS releases the lock when
/// the descriptor is closed.
#[derive(Debug)]
pub struct LockGuard {
    /// Locked handle on the lock file.
    file: File,

    /// Path to the lock file.
    path: PathBuf,

    /// Registry the lock was recorded in on acquisition.
    registry: HeldLocks,

    /// Whether the lock has been released manually.
    released: bool,
}

impl LockGuard {
    pub(super) fn new(file: File, path: PathBuf, registry: HeldLocks) -> Self {
        Self {
            file,
            path,
            registry,
            released: false,
        }
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Manually release the lock, surfacing an unlock failure.
    pub fn release(mut self) -> Result<()> {
        self.release_inner().map_err(|e| {
            SpeakError::LockAcquisition(format!(
                "failed to release lock '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    fn release_inner(&mut self) -> io::Result<()> {
        self.released = true;
        let path = &self.path;
        self.registry.deregister_with(path, || {
            remove_backing_file(path);
        });
        FileExt::unlock(&self.file)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.release_inner()
        {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to release lock"
            );
        }
    }
}

/// Remove a lock file, ignoring a file that is already gone.
///
/// Returns whether a file was actually removed.
pub(super) fn remove_backing_file(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "could not remove lock file");
            false
        }
    }
}
