//! Command tree for the `agentic-ops` binary.
//!
//! Noun-verb layout: `agentic-ops db migrate`, `agentic-ops deploy run`.
//! Global flags override the matching environment settings from [`Config`].

pub mod db;
pub mod deploy;
pub mod message_log;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

/// Operate the agentic wallet platform: message log database and contract rollouts.
#[derive(Parser)]
#[command(name = "agentic-ops", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Message log database path (overrides DATABASE_URL).
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Target network from the networks file (overrides AGENTIC_NETWORK).
    #[arg(long, global = true)]
    pub network: Option<String>,

    /// Directory holding NNN_name.toml migration files.
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Directory holding compiled contract artifacts.
    #[arg(long, global = true)]
    pub artifacts_dir: Option<PathBuf>,

    /// Directory holding per-network deployment manifests.
    #[arg(long, global = true)]
    pub deployments_dir: Option<PathBuf>,

    /// RON file with network definitions.
    #[arg(long, global = true)]
    pub networks_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Message log schema versioning (migrate, rollback, status).
    Db {
        #[command(subcommand)]
        action: db::DbCommand,
    },

    /// Users of the message log.
    Users {
        #[command(subcommand)]
        action: message_log::UsersCommand,
    },

    /// Agents acting for a user.
    Agents {
        #[command(subcommand)]
        action: message_log::AgentsCommand,
    },

    /// Logged agent messages.
    Messages {
        #[command(subcommand)]
        action: message_log::MessagesCommand,
    },

    /// Contract migrations (run, status, addresses, verify).
    Deploy {
        #[command(subcommand)]
        action: deploy::DeployCommand,
    },
}

impl Cli {
    /// Apply command-line overrides on top of the environment config
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(network) = &self.network {
            config.network = network.clone();
        }
        if let Some(dir) = &self.migrations_dir {
            config.migrations_dir = dir.clone();
        }
        if let Some(dir) = &self.artifacts_dir {
            config.artifacts_dir = dir.clone();
        }
        if let Some(dir) = &self.deployments_dir {
            config.deployments_dir = dir.clone();
        }
        if let Some(file) = &self.networks_file {
            config.networks_file = file.clone();
        }
    }
}

/// Run the parsed command
pub async fn dispatch(cli: Cli, config: &Config) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Db { action } => db::handle_db_command(action, config, json),
        Commands::Users { action } => message_log::handle_users_command(action, config, json),
        Commands::Agents { action } => message_log::handle_agents_command(action, config, json),
        Commands::Messages { action } => message_log::handle_messages_command(action, config, json),
        Commands::Deploy { action } => deploy::handle_deploy_command(action, config, json).await,
    }
}

/// Pretty-print a serializable value as JSON
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy_run_with_global_flags() {
        let cli = Cli::try_parse_from([
            "agentic-ops",
            "deploy",
            "run",
            "--network",
            "base",
            "--to",
            "2",
            "--dry-run",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.network.as_deref(), Some("base"));
        match cli.command {
            Commands::Deploy {
                action: deploy::DeployCommand::Run { to, dry_run },
            } => {
                assert_eq!(to, Some(2));
                assert!(dry_run);
            }
            _ => panic!("expected deploy run"),
        }
    }

    #[test]
    fn test_overrides_replace_environment_values() {
        let cli = Cli::try_parse_from([
            "agentic-ops",
            "--database-url",
            "/tmp/override.db",
            "--deployments-dir",
            "/tmp/deployments",
            "db",
            "status",
        ])
        .unwrap();

        let mut config = Config::from_env();
        let network_before = config.network.clone();
        cli.apply_overrides(&mut config);
        assert_eq!(config.database_url, "/tmp/override.db");
        assert_eq!(config.deployments_dir, PathBuf::from("/tmp/deployments"));
        assert_eq!(config.network, network_before);
    }

    #[test]
    fn test_rollback_requires_target() {
        assert!(Cli::try_parse_from(["agentic-ops", "db", "rollback"]).is_err());
        assert!(Cli::try_parse_from(["agentic-ops", "db", "rollback", "--to", "0"]).is_ok());
    }
}
