//! Exit code constants for the speak CLI.
//!
//! External orchestrators (including `speak listen`) rely on these values:
//! - 0: Completed
//! - 1: Generic failure (bad config, render/playback error, lock I/O error)
//! - 2: Skipped because another instance holds the lock
//! - 3: Timed out waiting for the lock
//!
//! Interrupted runs exit with the conventional `128 + signal` codes.

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// Generic failure.
pub const FAILURE: i32 = 1;

/// Fail-fast policy found the lock held elsewhere.
pub const SKIPPED_BUSY: i32 = 2;

/// Bounded-wait policy exceeded its timeout.
pub const LOCK_TIMEOUT: i32 = 3;

/// Terminated by SIGINT (Ctrl-C).
pub const INTERRUPTED: i32 = 130;

/// Terminated by SIGTERM.
pub const TERMINATED: i32 = 143;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            SUCCESS,
            FAILURE,
            SKIPPED_BUSY,
            LOCK_TIMEOUT,
            INTERRUPTED,
            TERMINATED,
        ];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Exit codes must be distinct");
                }
            }
        }
    }

    #[test]
    fn exit_codes_match_orchestrator_contract() {
        assert_eq!(SUCCESS, 0);
        assert_eq!(FAILURE, 1);
        assert_eq!(SKIPPED_BUSY, 2);
        assert_eq!(LOCK_TIMEOUT, 3);
    }
}
