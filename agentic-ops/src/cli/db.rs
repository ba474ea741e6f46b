//! `agentic-ops db` subcommands: schema versioning of the message log.

use anyhow::{Context, Result};
use clap::Subcommand;

use super::print_json;
use crate::config::Config;
use crate::db::migrations::latest_version;
use crate::db::Database;

#[derive(Subcommand)]
pub enum DbCommand {
    /// Apply pending schema migrations.
    Migrate {
        /// Stop after this version (default: latest).
        #[arg(long)]
        to: Option<i64>,
    },

    /// Revert applied schema migrations above a version.
    Rollback {
        /// Version to roll back to (0 empties the schema).
        #[arg(long)]
        to: i64,
    },

    /// Show applied and pending schema migrations.
    Status,
}

pub fn handle_db_command(cmd: DbCommand, config: &Config, json: bool) -> Result<()> {
    let db = Database::new(&config.database_url)
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    match cmd {
        DbCommand::Migrate { to } => {
            let applied = db.migrate_up(to).context("Schema migration failed")?;
            report_change(&db, "Applied", &applied, json)
        }
        DbCommand::Rollback { to } => {
            let reverted = db.migrate_down(to).context("Schema rollback failed")?;
            report_change(&db, "Reverted", &reverted, json)
        }
        DbCommand::Status => {
            let status = db.schema_status()?;
            if json {
                return print_json(&serde_json::json!({
                    "version": db.schema_version()?,
                    "latest": latest_version(),
                    "migrations": status,
                }));
            }

            println!("Schema version {} (latest {})", db.schema_version()?, latest_version());
            for entry in status {
                let state = match &entry.applied_at {
                    Some(at) => format!("applied {}", at),
                    None => "pending".to_string(),
                };
                println!("  {:>3} {:<36} {}", entry.version, entry.name, state);
            }
            Ok(())
        }
    }
}

fn report_change(db: &Database, verb: &str, versions: &[i64], json: bool) -> Result<()> {
    let version = db.schema_version()?;
    if json {
        return print_json(&serde_json::json!({
            "changed": versions,
            "version": version,
        }));
    }

    if versions.is_empty() {
        println!("Nothing to do; schema is at version {}", version);
    } else {
        println!("{} {:?}; schema is at version {}", verb, versions, version);
    }
    Ok(())
}
