//! Command-line definition of `cronyxctl`.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Top-level arguments.
#[derive(Debug, Parser)]
#[command(name = "cronyxctl")]
#[command(about = "Control a simulated cronyx adapter system", long_about = None)]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Core configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Topology file describing the mock adapters (TOML)
    #[arg(long, global = true)]
    pub topology: Option<PathBuf>,

    /// Use a read-only control session
    #[arg(long, global = true)]
    pub read_only: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print the core version
    Version,

    /// List every registered item
    List {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one item, by id, name, dotted suffix or alias
    Info {
        /// Item id, name or alias
        target: String,
    },

    /// Read a parameter (proto, mode, loop, line-code, cas, timeslots,
    /// debug, mtu, qlen, stat, led)
    Get {
        /// Item id, name or alias
        target: String,
        /// Parameter name
        param: String,
    },

    /// Write a parameter
    Set {
        /// Item id, name or alias
        target: String,
        /// Parameter name
        param: String,
        /// New value
        value: String,
    },

    /// Bind a protocol to a channel ("none" unbinds)
    Bind {
        /// Channel id, name or alias
        target: String,
        /// Protocol name, or "none"
        protocol: String,
    },

    /// Feed generated frames into a channel and report its counters
    Traffic {
        /// Channel id, name or alias
        target: String,

        /// Number of frames
        #[arg(long, default_value = "1000")]
        frames: u64,

        /// Frame length in octets
        #[arg(long, default_value = "64")]
        len: usize,

        /// Protocol to bind first
        #[arg(long)]
        protocol: Option<String>,
    },
}

/// Default log filter for a `-v` count.
pub fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        let cli =
            Cli::try_parse_from(["cronyxctl", "-vv", "set", "uplink", "mtu", "1500"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(
            cli.command,
            Command::Set {
                target: "uplink".into(),
                param: "mtu".into(),
                value: "1500".into()
            }
        );
    }

    #[test]
    fn test_parse_traffic_defaults() {
        let cli = Cli::try_parse_from(["cronyxctl", "traffic", "c0", "--read-only"]).unwrap();
        assert!(cli.read_only);
        match cli.command {
            Command::Traffic { frames, len, protocol, .. } => {
                assert_eq!(frames, 1000);
                assert_eq!(len, 64);
                assert!(protocol.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(log_level(0), "warn");
        assert_eq!(log_level(1), "info");
        assert_eq!(log_level(9), "trace");
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
