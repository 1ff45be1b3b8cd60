//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the polling server
//! - `config show|path` -- inspect configuration
//! - `version` -- print build/version info

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config;

/// Live classroom polling server.
#[derive(Parser, Debug)]
#[command(
    name = "livepoll",
    version = env!("CARGO_PKG_VERSION"),
    about = "livepoll: single-question live polling with real-time results"
)]
pub struct Cli {
    /// Config file (defaults to $LIVEPOLL_CONFIG_PATH, then ./livepoll.json5).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Config file this invocation reads.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(config::get_config_path)
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the fully loaded configuration (file plus environment) as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

/// Run the `config show` subcommand.
pub fn handle_config_show(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config_from(path)?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);

    let issues = config::validate_config(&cfg);
    for issue in &issues {
        eprintln!("warning: {} {}", issue.path, issue.message);
    }
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path(path: &Path) {
    let marker = if path.exists() { "" } else { " (not found, defaults apply)" };
    println!("{}{}", path.display(), marker);
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("livepoll {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("LIVEPOLL_BUILD_DATE"));
    println!("  Git commit: {}", env!("LIVEPOLL_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_start() {
        let cli = Cli::try_parse_from(["livepoll"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_start_with_config() {
        let cli = Cli::try_parse_from(["livepoll", "start", "--config", "/tmp/lp.json5"]).unwrap();
        assert_eq!(cli.command, Some(Command::Start));
        assert_eq!(cli.config_path(), PathBuf::from("/tmp/lp.json5"));
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["livepoll", "config", "show"]).unwrap();
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Show)));

        let cli = Cli::try_parse_from(["livepoll", "-c", "x.json5", "config", "path"]).unwrap();
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Path)));
        assert_eq!(cli.config_path(), PathBuf::from("x.json5"));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        assert!(Cli::try_parse_from(["livepoll", "status"]).is_err());
    }

    #[test]
    fn test_config_show_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livepoll.json5");
        std::fs::write(&path, "{ polls: { historyPageSize: 5 } }").unwrap();
        assert!(handle_config_show(&path).is_ok());
    }
}
