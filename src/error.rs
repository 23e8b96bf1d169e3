//! Error types for the speak CLI.
//!
//! Uses thiserror for derive macros. Lock contention (busy, timed out) is not
//! an error: it is reported through `runner::OperationOutcome` instead.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for speak operations.
#[derive(Error, Debug)]
pub enum SpeakError {
    /// Conflicting or missing invocation parameters; nothing was attempted.
    #[error("{0}")]
    Config(String),

    /// The render, playback, or save capability failed.
    #[error("{0}")]
    Capability(String),

    /// The lock file could not be opened or locked at all.
    #[error("Lock acquisition failed: {0}")]
    LockAcquisition(String),

    /// The message bus refused or dropped the connection for good.
    #[error("Message bus error: {0}")]
    Bus(String),

    /// Any other I/O failure outside the protected call.
    #[error("{0}")]
    Io(String),
}

impl SpeakError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            SpeakError::Config(_)
            | SpeakError::Capability(_)
            | SpeakError::LockAcquisition(_)
            | SpeakError::Bus(_)
            | SpeakError::Io(_) => exit_codes::FAILURE,
        }
    }
}

/// Result type alias for speak operations.
pub type Result<T> = std::result::Result<T, SpeakError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_never_collide_with_contention_codes() {
        let errors = [
            SpeakError::Config("both --skip-if-locked and --lock-timeout".into()),
            SpeakError::Capability("piper exited with status 1".into()),
            SpeakError::LockAcquisition("permission denied".into()),
            SpeakError::Bus("connection refused".into()),
            SpeakError::Io("disk full".into()),
        ];
        for err in &errors {
            assert_eq!(err.exit_code(), exit_codes::FAILURE);
            assert_ne!(err.exit_code(), exit_codes::SKIPPED_BUSY);
            assert_ne!(err.exit_code(), exit_codes::LOCK_TIMEOUT);
        }
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = SpeakError::LockAcquisition("failed to open '/tmp/x.lock'".to_string());
        assert_eq!(
            err.to_string(),
            "Lock acquisition failed: failed to open '/tmp/x.lock'"
        );

        let err = SpeakError::Bus("connection refused".to_string());
        assert_eq!(err.to_string(), "Message bus error: connection refused");
    }
}
