//! The advisory lock primitive: open, lock, verify, stamp.

use super::guard::LockGuard;
use super::metadata::LockMetadata;
use super::registry::HeldLocks;
use crate::error::{Result, SpeakError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// How to behave when another holder has the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Report `Busy` immediately.
    NonBlocking,
    /// Suspend the calling thread until the lock is free.
    Blocking,
}

/// Result of a single acquisition attempt.
#[derive(Debug)]
pub enum LockAttempt {
    /// The lock is ours until the guard is dropped.
    Held(LockGuard),
    /// Someone else holds it (only returned in `NonBlocking` mode).
    Busy,
}

/// Acquire the exclusive advisory lock at `lock_path`.
///
/// The lock is an OS-level `flock`-style lock on an open descriptor, so it is
/// released automatically when the holding process exits for any reason. The
/// file itself is created on demand and may be removed by a releasing holder;
/// an attempt that ends up locking an unlinked file retries on the new one.
///
/// # Returns
///
/// * `Ok(LockAttempt::Held(_))` - Lock acquired and recorded in `registry`
/// * `Ok(LockAttempt::Busy)` - Held elsewhere (non-blocking mode only)
/// * `Err(SpeakError::LockAcquisition)` - The file could not be opened or locked
pub fn acquire(lock_path: &Path, mode: AcquireMode, registry: &HeldLocks) -> Result<LockAttempt> {
    loop {
        let file = open_lock_file(lock_path)?;

        let locked = match mode {
            AcquireMode::Blocking => file.lock_exclusive().map(|()| true),
            AcquireMode::NonBlocking => match file.try_lock_exclusive() {
                Ok(()) => Ok(true),
                Err(e) if is_contended(&e) => Ok(false),
                Err(e) => Err(e),
            },
        }
        .map_err(|e| {
            SpeakError::LockAcquisition(format!(
                "failed to lock '{}': {}",
                lock_path.display(),
                e
            ))
        })?;

        if !locked {
            return Ok(LockAttempt::Busy);
        }

        if !still_linked(&file, lock_path) {
            tracing::debug!(
                path = %lock_path.display(),
                "lock file was replaced while acquiring, retrying"
            );
            continue;
        }

        stamp_metadata(&file, lock_path);
        registry.register(lock_path);
        tracing::debug!(path = %lock_path.display(), pid = std::process::id(), "lock acquired");

        return Ok(LockAttempt::Held(LockGuard::new(
            file,
            lock_path.to_path_buf(),
            registry.clone(),
        )));
    }
}

/// Check whether the lock at `lock_path` is currently free, without keeping it.
#[cfg(test)]
pub fn is_free(lock_path: &Path) -> Result<bool> {
    match acquire(lock_path, AcquireMode::NonBlocking, &HeldLocks::new())? {
        LockAttempt::Held(guard) => {
            drop(guard);
            Ok(true)
        }
        LockAttempt::Busy => Ok(false),
    }
}

/// What `lock status` reports.
#[derive(Debug)]
pub enum LockStatus {
    Free,
    /// Held by another process; metadata is absent while the holder is still
    /// writing it, or if it never could.
    Held(Option<LockMetadata>),
}

/// Inspect the lock without disturbing a holder.
///
/// A missing lock file is reported free without creating it. An existing
/// file is opened read-only and checked with a momentary shared lock, so the
/// file is never stamped or removed. The shared lock still conflicts with an
/// exclusive attempt made in that same instant.
pub fn status(lock_path: &Path) -> Result<LockStatus> {
    let file = match File::open(lock_path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LockStatus::Free),
        Err(e) => {
            return Err(SpeakError::LockAcquisition(format!(
                "failed to open lock file '{}': {}",
                lock_path.display(),
                e
            )));
        }
    };

    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            Ok(LockStatus::Free)
        }
        Err(e) if is_contended(&e) => {
            Ok(LockStatus::Held(LockMetadata::from_file(lock_path).ok()))
        }
        Err(e) => Err(SpeakError::LockAcquisition(format!(
            "failed to check lock '{}': {}",
            lock_path.display(),
            e
        ))),
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File> {
    if let Some(parent) = lock_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            SpeakError::LockAcquisition(format!(
                "failed to create lock directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| {
            SpeakError::LockAcquisition(format!(
                "failed to open lock file '{}': {}",
                lock_path.display(),
                e
            ))
        })
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn still_linked(file: &File, lock_path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(lock_path)) {
        (Ok(held), Ok(linked)) => held.dev() == linked.dev() && held.ino() == linked.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, lock_path: &Path) -> bool {
    // Open files cannot be unlinked here, so the path always names our file.
    lock_path.exists()
}

/// Record the holder pid for operators. Failures only cost diagnostics.
fn stamp_metadata(file: &File, lock_path: &Path) {
    let write = || -> io::Result<()> {
        let json = LockMetadata::current()
            .to_json()
            .map_err(|e| io::Error::other(e.to_string()))?;
        file.set_len(0)?;
        let mut writer = file;
        writer.write_all(json.as_bytes())?;
        writer.flush()
    };

    if let Err(e) = write() {
        tracing::warn!(
            path = %lock_path.display(),
            error = %e,
            "failed to write lock metadata"
        );
    }
}
