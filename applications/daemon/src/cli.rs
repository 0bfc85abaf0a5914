/// Command line interface
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "turbosync")]
#[command(about = "Keeps marked remote directories mirrored to local copies", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file path (defaults to ./turbosync.toml when present)
    #[arg(short, long, global = true, env = "TURBOSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Run the daemon until interrupted (default)
    Run {
        /// Print one JSON status snapshot per line on stdout
        #[arg(long)]
        status_json: bool,

        /// Read commands (sync, watch on|off, status, rescan, quit) from stdin
        #[arg(long)]
        stdin_commands: bool,
    },
    /// Discover sync targets once and print them
    Scan {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Discover and sync every target once, then exit
    SyncOnce,
    /// Verify binaries and directories
    Check,
}

impl Cli {
    /// The selected command, `run` when none was given
    pub fn selected(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run {
            status_json: false,
            stdin_commands: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::try_parse_from(["turbosync"]).unwrap();
        assert_eq!(
            cli.selected(),
            Commands::Run {
                status_json: false,
                stdin_commands: false
            }
        );
        assert!(!cli.verbose);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["turbosync", "scan", "--json", "-v", "--config", "/etc/t.toml"])
                .unwrap();
        assert_eq!(cli.selected(), Commands::Scan { json: true });
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/t.toml")));
    }

    #[test]
    fn test_run_flags() {
        let cli =
            Cli::try_parse_from(["turbosync", "run", "--status-json", "--stdin-commands"]).unwrap();
        assert_eq!(
            cli.selected(),
            Commands::Run {
                status_json: true,
                stdin_commands: true
            }
        );
        assert_eq!(
            Cli::try_parse_from(["turbosync", "sync-once"])
                .unwrap()
                .selected(),
            Commands::SyncOnce
        );
    }
}
