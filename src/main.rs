//! Speak: text-to-speech with single-instance coordination.
//!
//! This is the main entry point for the `speak` CLI. It parses arguments,
//! loads configuration, dispatches to the appropriate command handler, and
//! handles errors with proper exit codes.

mod bridge;
mod cli;
mod commands;
pub mod config;
pub mod error;
pub mod exit_codes;
pub mod locks;
mod logging;
pub mod runner;
mod signals;
pub mod speech;
pub mod strategy;

use cli::Cli;
use config::Config;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = match Cli::try_parse_args() {
        Ok(cli) => cli,
        Err(err) => {
            // Usage errors exit 1; clap's default of 2 means "skipped busy" here.
            let _ = err.print();
            return exit_code(if err.use_stderr() {
                exit_codes::FAILURE
            } else {
                exit_codes::SUCCESS
            });
        }
    };

    logging::init(cli.verbose, cli.quiet);

    let result = Config::resolve(cli.config.as_deref())
        .and_then(|config| commands::dispatch(cli.command, &config, cli.config.clone()));

    match result {
        Ok(code) => exit_code(code),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);
            exit_code(err.exit_code())
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
