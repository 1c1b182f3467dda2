use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "bundle-unread",
    about = "Unread-message tracker for the data-bundle agent network"
)]
pub struct Cli {
    /// Path to config file (default: ./config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Load unread counts for a viewer and print them
    Snapshot(SessionArgs),
    /// Load counts, stream the fixture's live messages, then apply its mark-read list
    Replay(SessionArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// TOML fixture seeding the in-memory message store
    #[arg(long)]
    pub fixture: PathBuf,

    /// Viewer id (the agent id, or any admin id)
    #[arg(long)]
    pub viewer: String,

    /// Viewer role: agent or admin
    #[arg(long, default_value = "agent")]
    pub role: String,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn parses_snapshot_with_default_role() {
        let cli = Cli::parse_from([
            "bundle-unread",
            "snapshot",
            "--fixture",
            "seed.toml",
            "--viewer",
            "agent-7",
        ]);

        let Command::Snapshot(args) = cli.command else {
            panic!("expected snapshot command");
        };
        assert_eq!(args.role, "agent");
        assert_eq!(args.viewer, "agent-7");
    }

    #[test]
    fn parses_replay_with_global_config() {
        let cli = Cli::parse_from([
            "bundle-unread",
            "replay",
            "--fixture",
            "seed.toml",
            "--viewer",
            "admin-1",
            "--role",
            "admin",
            "--config",
            "custom.toml",
        ]);

        assert!(matches!(cli.command, Command::Replay(_)));
        assert_eq!(
            cli.config
                .as_deref()
                .map(|p| p.to_string_lossy().to_string()),
            Some("custom.toml".to_owned())
        );
    }

    #[test]
    fn requires_a_subcommand() {
        assert!(Cli::try_parse_from(["bundle-unread"]).is_err());
    }
}
