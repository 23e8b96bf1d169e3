//! Command implementations for speak.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Handlers return the process exit code on success so that
//! contention outcomes (skipped, timed out) can exit non-zero without being
//! errors.

mod listen;
mod say;

use crate::cli::{Command, LockAction, LockCommand};
use crate::config::Config;
use crate::error::Result;
use crate::exit_codes;
use crate::locks::{self, LockStatus};
use std::path::PathBuf;

/// Dispatch a command to its implementation.
pub fn dispatch(command: Command, config: &Config, config_path: Option<PathBuf>) -> Result<i32> {
    match command {
        Command::Say(args) => say::cmd_say(config, args),
        Command::Listen(args) => listen::cmd_listen(config, config_path, args),
        Command::Lock(lock_cmd) => dispatch_lock(lock_cmd, config),
    }
}

/// Dispatch lock subcommands.
fn dispatch_lock(lock_cmd: LockCommand, config: &Config) -> Result<i32> {
    match lock_cmd.action {
        LockAction::Status => cmd_lock_status(config),
    }
}

fn cmd_lock_status(config: &Config) -> Result<i32> {
    let path = &config.lock_path;

    match locks::status(path)? {
        LockStatus::Free => {
            println!("Lock is free.");
            println!("    Path:       {}", path.display());
        }
        LockStatus::Held(meta) => {
            println!("Lock is held.");
            match meta {
                Some(meta) => {
                    println!("    Owner:      {}", meta.owner);
                    println!("    PID:        {}", meta.pid);
                    println!(
                        "    Acquired:   {}",
                        meta.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    println!("    Age:        {}", meta.age_string());
                }
                None => println!("    Holder:     unknown (no metadata)"),
            }
            println!("    Path:       {}", path.display());
        }
    }

    Ok(exit_codes::SUCCESS)
}
