//! Process-local record of which coordination locks this process holds.
//!
//! The signal watcher consults it to clean up lock files before exiting.
//! Guards and the watcher serialize on the same mutex: a guard removes its
//! file and deregisters under the mutex, and an eviction keeps the mutex until
//! the process is gone. That way a file is only ever unlinked while this
//! process still holds the advisory lock on it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared handle to the held-lock registry.
#[derive(Debug, Clone, Default)]
pub struct HeldLocks {
    inner: Arc<Mutex<Vec<PathBuf>>>,
}

impl HeldLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn register(&self, path: &Path) {
        self.entries().push(path.to_path_buf());
    }

    /// Run `remove` and drop the entry for `path` as one step.
    ///
    /// Does nothing if the entry was already evicted.
    pub(super) fn deregister_with<F: FnOnce()>(&self, path: &Path, remove: F) {
        let mut entries = self.entries();
        if let Some(pos) = entries.iter().position(|p| p == path) {
            remove();
            entries.swap_remove(pos);
        }
    }

    /// Whether this process currently holds the lock at `path`.
    #[cfg(test)]
    pub fn is_held(&self, path: &Path) -> bool {
        self.entries().iter().any(|p| p == path)
    }

    /// Remove the backing file of every held lock and freeze the registry.
    ///
    /// The advisory locks stay held; the caller is expected to exit the
    /// process while the returned value is alive, which drops them.
    pub fn evict(&self) -> Eviction<'_> {
        let entries = self.entries();
        let mut removed = 0;
        for path in entries.iter() {
            if super::guard::remove_backing_file(path) {
                removed += 1;
            }
        }
        Eviction {
            _entries: entries,
            removed,
        }
    }
}

/// Keeps the registry frozen after an eviction.
#[derive(Debug)]
pub struct Eviction<'a> {
    _entries: MutexGuard<'a, Vec<PathBuf>>,
    /// Number of lock files removed.
    pub removed: usize,
}
