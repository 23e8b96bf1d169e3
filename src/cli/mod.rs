//! CLI argument parsing for speak.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use crate::strategy::{ContentionFlags, Strategy};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Speak: text-to-speech with single-instance coordination.
///
/// At most one synthesis/playback runs at a time on a host. Concurrent
/// invocations skip, wait for a bounded time, or queue, depending on the
/// chosen strategy.
#[derive(Parser, Debug)]
#[command(name = "speak")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a YAML config file (default: $SPEAK_CONFIG).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for speak.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synthesize text, then save and/or play it.
    ///
    /// Exit codes: 0 completed, 1 failure, 2 skipped because another
    /// instance is speaking, 3 timed out waiting for the lock.
    Say(SayArgs),

    /// Speak every message published on an MQTT topic.
    ///
    /// Each message runs as its own `speak say` process under the
    /// configured strategy. Stops on Ctrl-C or SIGTERM.
    Listen(ListenArgs),

    /// Lock inspection commands.
    Lock(LockCommand),
}

/// Arguments for the `say` command.
#[derive(Parser, Debug)]
#[command(group(
    clap::ArgGroup::new("input").required(true).args(["text", "file"])
))]
pub struct SayArgs {
    /// Text to speak.
    #[arg(short, long)]
    pub text: Option<String>,

    /// Read the text from a file.
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Save the audio to this WAV file.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Play the audio.
    #[arg(short, long)]
    pub play: bool,

    /// Voice model (default from config).
    #[arg(short, long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Request GPU acceleration from the synthesizer.
    #[arg(long)]
    pub gpu: bool,

    /// What to do when another instance is speaking.
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Exit with code 2 immediately if another instance is speaking.
    #[arg(long)]
    pub skip_if_locked: bool,

    /// Wait at most this many seconds for the lock, then exit with code 3.
    #[arg(long, value_name = "SECONDS")]
    pub lock_timeout: Option<f64>,

    /// Run without coordinating with other instances.
    #[arg(long)]
    pub no_lock: bool,
}

impl SayArgs {
    pub fn contention_flags(&self) -> ContentionFlags {
        ContentionFlags {
            strategy: self.strategy,
            skip_if_locked: self.skip_if_locked,
            lock_timeout: self.lock_timeout,
            no_lock: self.no_lock,
        }
    }
}

/// Arguments for the `listen` command.
#[derive(Parser, Debug)]
pub struct ListenArgs {
    /// MQTT broker host.
    #[arg(short, long)]
    pub server: Option<String>,

    /// MQTT broker port.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Topic to subscribe to.
    #[arg(short, long)]
    pub topic: Option<String>,

    /// Broker username.
    #[arg(short, long)]
    pub username: Option<String>,

    /// Broker password.
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// What to do when another instance is speaking (default from config: skip).
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Skip messages that arrive while another instance is speaking.
    #[arg(long)]
    pub skip_if_locked: bool,

    /// Lock wait budget for the `timeout` strategy; alone it selects `timeout`.
    #[arg(long, value_name = "SECONDS")]
    pub lock_timeout: Option<f64>,

    /// Speak every message without coordinating with other instances.
    #[arg(long)]
    pub no_lock: bool,

    /// Request GPU acceleration from the synthesizer.
    #[arg(long)]
    pub gpu: bool,

    /// Save each message's audio to this file instead of playing it.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Log stats after this many messages.
    #[arg(long, value_name = "N")]
    pub stats_every: Option<u64>,
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Show whether the speech lock is free or held, and by whom.
    ///
    /// The check holds a shared lock for an instant and never writes or
    /// removes the lock file. A `--strategy skip` call landing in that same
    /// instant can still see the lock as busy.
    Status,
}

impl Cli {
    /// Parse command line arguments, leaving clap's error handling to the caller.
    pub fn try_parse_args() -> Result<Self, clap::Error> {
        Cli::try_parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_say_minimal() {
        let cli = Cli::try_parse_from(["speak", "say", "-t", "Hello"]).unwrap();
        if let Command::Say(args) = cli.command {
            assert_eq!(args.text.as_deref(), Some("Hello"));
            assert!(args.output.is_none());
            assert!(!args.play);
            assert_eq!(args.contention_flags(), ContentionFlags::default());
        } else {
            panic!("Expected Say command");
        }
    }

    #[test]
    fn parse_say_full() {
        let cli = Cli::try_parse_from([
            "speak",
            "--config",
            "speak.yaml",
            "-v",
            "say",
            "--file",
            "note.txt",
            "-o",
            "out.wav",
            "-p",
            "-m",
            "voice.onnx",
            "--gpu",
            "--strategy",
            "timeout",
            "--lock-timeout",
            "2.5",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("speak.yaml")));
        assert_eq!(cli.verbose, 1);
        if let Command::Say(args) = cli.command {
            assert_eq!(args.file, Some(PathBuf::from("note.txt")));
            assert_eq!(args.output, Some(PathBuf::from("out.wav")));
            assert!(args.play);
            assert_eq!(args.model, Some(PathBuf::from("voice.onnx")));
            assert!(args.gpu);
            assert_eq!(args.strategy, Some(Strategy::Timeout));
            assert_eq!(args.lock_timeout, Some(2.5));
        } else {
            panic!("Expected Say command");
        }
    }

    #[test]
    fn say_requires_exactly_one_text_source() {
        assert!(Cli::try_parse_from(["speak", "say"]).is_err());
        assert!(Cli::try_parse_from(["speak", "say", "-t", "hi", "-f", "note.txt"]).is_err());
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from(["speak", "say", "-t", "hi", "-q"]).unwrap();
        assert!(cli.quiet);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["speak", "-q", "-v", "lock", "status"]).is_err());
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(Cli::try_parse_from(["speak", "say", "-t", "hi", "--strategy", "later"]).is_err());
    }

    #[test]
    fn parse_listen() {
        let cli = Cli::try_parse_from([
            "speak",
            "listen",
            "-s",
            "broker.local",
            "-p",
            "8883",
            "-t",
            "home/tts",
            "-u",
            "me",
            "-P",
            "secret",
            "--strategy",
            "queue",
            "--stats-every",
            "5",
        ])
        .unwrap();

        if let Command::Listen(args) = cli.command {
            assert_eq!(args.server.as_deref(), Some("broker.local"));
            assert_eq!(args.port, Some(8883));
            assert_eq!(args.topic.as_deref(), Some("home/tts"));
            assert_eq!(args.username.as_deref(), Some("me"));
            assert_eq!(args.password.as_deref(), Some("secret"));
            assert_eq!(args.strategy, Some(Strategy::Queue));
            assert_eq!(args.stats_every, Some(5));
            assert!(args.output.is_none());
        } else {
            panic!("Expected Listen command");
        }
    }

    #[test]
    fn parse_listen_contention_flags() {
        let cli =
            Cli::try_parse_from(["speak", "listen", "--skip-if-locked", "--no-lock"]).unwrap();

        if let Command::Listen(args) = cli.command {
            assert!(args.skip_if_locked);
            assert!(args.no_lock);
            assert!(args.strategy.is_none());
            assert!(args.lock_timeout.is_none());
        } else {
            panic!("Expected Listen command");
        }
    }

    #[test]
    fn parse_lock_status() {
        let cli = Cli::try_parse_from(["speak", "lock", "status"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Lock(LockCommand {
                action: LockAction::Status
            })
        ));
    }
}
