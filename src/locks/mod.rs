//! Single-instance coordination lock.
//!
//! At most one process per host runs a synthesis/playback operation at a time.
//! Every cooperating process locks the same well-known file with an OS
//! advisory lock (`flock` on unix, `LockFileEx` on Windows, via `fs2`).
//!
//! # Lock File
//!
//! The lock lives at a fixed path (by default `<temp_dir>/speak-tts.lock`).
//! The lock is tied to the open descriptor, not to the file's existence, so a
//! crashed holder never leaves a stale lock behind: the OS releases it when the
//! process dies.
//!
//! # Lock Metadata
//!
//! On acquisition the holder writes JSON metadata (`owner`, `pid`,
//! `acquired_at`) into the file for operators. It is never read back to decide
//! ownership.
//!
//! # RAII Guards
//!
//! Locks are held through [`LockGuard`]. Dropping the guard removes the file
//! while the lock is still held and then unlocks, on every exit path
//! including unwinding.

mod guard;
mod metadata;
mod operations;
mod policy;
mod registry;


// Re-export public API
pub use guard::LockGuard;
pub use metadata::LockMetadata;
pub use operations::{AcquireMode, LockAttempt, LockStatus, acquire, status};
#[cfg(test)]
pub use operations::is_free;
pub use policy::{Acquisition, ContentionPolicy, Coordinator, timeout_from_secs};
pub use registry::HeldLocks;
