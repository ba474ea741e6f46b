//! `users`, `agents` and `messages` subcommands over the message log.
//!
//! Every handler opens the database with its schema brought up to date.

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use ethers::types::Address;

use super::print_json;
use crate::config::Config;
use crate::db::Database;
use crate::models::{Agent, Message, MessageRole, User};

#[derive(Subcommand)]
pub enum UsersCommand {
    /// Register a user by wallet address.
    Add {
        /// User wallet address (0x...).
        wallet: String,
    },

    /// List all users.
    #[command(alias = "ls")]
    List,

    /// Delete a user with all of their agents and messages.
    #[command(alias = "rm")]
    Remove {
        /// User wallet address.
        wallet: String,
    },
}

#[derive(Subcommand)]
pub enum AgentsCommand {
    /// Register an agent for a user (the user is created if unknown).
    Add {
        /// Owning user's wallet address.
        user_wallet: String,

        /// Agent address.
        agent_address: String,

        /// Display name.
        #[arg(long)]
        name: Option<String>,
    },

    /// List a user's agents with their message counts.
    #[command(alias = "ls")]
    List {
        /// Owning user's wallet address.
        user_wallet: String,
    },

    /// Delete an agent and its messages.
    #[command(alias = "rm")]
    Remove {
        /// Agent address.
        agent_address: String,
    },
}

#[derive(Subcommand)]
pub enum MessagesCommand {
    /// Append a message to an agent's log.
    Log {
        /// Agent address.
        agent_address: String,

        /// Author: user, agent or system.
        role: String,

        /// Message text.
        content: String,
    },

    /// Show an agent's most recent messages.
    #[command(alias = "ls")]
    List {
        /// Agent address.
        agent_address: String,

        /// Maximum number of messages.
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Only messages older than this id (for paging).
        #[arg(long)]
        before: Option<i64>,
    },

    /// Show a user's most recent messages across all of their agents.
    History {
        /// User wallet address.
        user_wallet: String,

        /// Maximum number of messages.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Delete a single message by id.
    #[command(alias = "rm")]
    Delete {
        /// Message id.
        id: i64,
    },

    /// Row totals across the message log.
    Stats,
}

fn open(config: &Config) -> Result<Database> {
    Database::open_migrated(&config.database_url)
        .with_context(|| format!("Failed to open database {}", config.database_url))
}

/// Reject anything that is not a 20-byte hex address
fn parse_address(value: &str) -> Result<String> {
    value
        .parse::<Address>()
        .map_err(|e| anyhow!("'{}' is not a valid address: {}", value, e))?;
    Ok(value.to_lowercase())
}

fn agent_by_address(db: &Database, address: &str) -> Result<Agent> {
    let address = parse_address(address)?;
    db.get_agent_by_address(&address)?
        .ok_or_else(|| anyhow!("Agent {} not found", address))
}

fn user_by_wallet(db: &Database, wallet: &str) -> Result<User> {
    let wallet = parse_address(wallet)?;
    db.get_user_by_wallet(&wallet)?
        .ok_or_else(|| anyhow!("User {} not found", wallet))
}

fn print_transcript(messages: &[Message]) {
    // Oldest first reads like a transcript
    for message in messages.iter().rev() {
        println!(
            "[{}] #{:<5} {:<6} {}",
            message.created_at.format("%Y-%m-%d %H:%M:%S"),
            message.id,
            message.role,
            message.content
        );
    }
}

pub fn handle_users_command(cmd: UsersCommand, config: &Config, json: bool) -> Result<()> {
    let db = open(config)?;
    match cmd {
        UsersCommand::Add { wallet } => {
            let user = db.create_user(&parse_address(&wallet)?)?;
            if json {
                return print_json(&user);
            }
            println!("Created user {} ({})", user.id, user.wallet_address);
        }
        UsersCommand::List => {
            let users = db.list_users()?;
            if json {
                return print_json(&users);
            }
            if users.is_empty() {
                println!("No users");
            }
            for user in users {
                println!(
                    "  {:>4}  {}  {:>6} messages  since {}",
                    user.id,
                    user.wallet_address,
                    db.user_message_count(user.id)?,
                    user.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        UsersCommand::Remove { wallet } => {
            let user = user_by_wallet(&db, &wallet)?;
            db.delete_user(user.id)?;
            log::info!("[db] Deleted user {} ({})", user.id, user.wallet_address);
            if json {
                return print_json(&user);
            }
            println!("Deleted user {} and everything logged for it", user.wallet_address);
        }
    }
    Ok(())
}

pub fn handle_agents_command(cmd: AgentsCommand, config: &Config, json: bool) -> Result<()> {
    let db = open(config)?;
    match cmd {
        AgentsCommand::Add {
            user_wallet,
            agent_address,
            name,
        } => {
            let user = db.get_or_create_user(&parse_address(&user_wallet)?)?;
            let agent = db.create_agent(user.id, &parse_address(&agent_address)?, name.as_deref())?;
            if json {
                return print_json(&agent);
            }
            println!(
                "Created agent {} ({}) for user {}",
                agent.id, agent.agent_address, user.wallet_address
            );
        }
        AgentsCommand::List { user_wallet } => {
            let user = user_by_wallet(&db, &user_wallet)?;
            let agents = db.list_agents_for_user(user.id)?;
            if json {
                return print_json(&agents);
            }
            for agent in agents {
                println!(
                    "  {:>4}  {}  {:<20} {:>6} messages",
                    agent.id,
                    agent.agent_address,
                    agent.name.as_deref().unwrap_or("-"),
                    db.agent_message_count(agent.id)?
                );
            }
        }
        AgentsCommand::Remove { agent_address } => {
            let agent = agent_by_address(&db, &agent_address)?;
            db.delete_agent(agent.id)?;
            log::info!("[db] Deleted agent {} ({})", agent.id, agent.agent_address);
            if json {
                return print_json(&agent);
            }
            println!("Deleted agent {}", agent.agent_address);
        }
    }
    Ok(())
}

pub fn handle_messages_command(cmd: MessagesCommand, config: &Config, json: bool) -> Result<()> {
    let db = open(config)?;
    match cmd {
        MessagesCommand::Log {
            agent_address,
            role,
            content,
        } => {
            let role: MessageRole = role
                .parse()
                .map_err(|_| anyhow!("Unknown role '{}' (expected user, agent or system)", role))?;
            let agent = agent_by_address(&db, &agent_address)?;
            let message = db.log_message(agent.id, role, &content)?;
            if json {
                return print_json(&message);
            }
            println!("Logged message {} for agent {}", message.id, agent.agent_address);
        }
        MessagesCommand::List {
            agent_address,
            limit,
            before,
        } => {
            let agent = agent_by_address(&db, &agent_address)?;
            let messages = db.list_messages_for_agent(agent.id, limit, before)?;
            if json {
                return print_json(&messages);
            }
            print_transcript(&messages);
        }
        MessagesCommand::History { user_wallet, limit } => {
            let user = user_by_wallet(&db, &user_wallet)?;
            let messages = db.list_messages_for_user(user.id, limit)?;
            if json {
                return print_json(&messages);
            }
            print_transcript(&messages);
        }
        MessagesCommand::Delete { id } => {
            let message = db
                .get_message(id)?
                .ok_or_else(|| anyhow!("Message {} not found", id))?;
            db.delete_message(id)?;
            if json {
                return print_json(&message);
            }
            println!("Deleted message {}", id);
        }
        MessagesCommand::Stats => {
            let stats = db.message_stats()?;
            if json {
                return print_json(&stats);
            }
            println!(
                "{} users, {} agents, {} messages",
                stats.users, stats.agents, stats.messages
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const USER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
    const AGENT: &str = "0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc";

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::from_env();
        config.database_url = dir.join("log.db").to_string_lossy().to_string();
        config
    }

    #[test]
    fn test_log_flow_through_commands() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        handle_agents_command(
            AgentsCommand::Add {
                user_wallet: USER.to_string(),
                agent_address: AGENT.to_string(),
                name: Some("trader".to_string()),
            },
            &config,
            false,
        )
        .unwrap();

        for role in ["user", "Agent"] {
            handle_messages_command(
                MessagesCommand::Log {
                    agent_address: AGENT.to_uppercase().replace("0X", "0x"),
                    role: role.to_string(),
                    content: "rebalance".to_string(),
                },
                &config,
                true,
            )
            .unwrap();
        }

        let db = Database::new(&config.database_url).unwrap();
        let user = db.get_user_by_wallet(&USER.to_lowercase()).unwrap().unwrap();
        let agent = db.get_agent_by_address(AGENT).unwrap().unwrap();
        assert_eq!(agent.name.as_deref(), Some("trader"));
        assert_eq!(db.agent_message_count(agent.id).unwrap(), 2);
        assert_eq!(db.user_message_count(user.id).unwrap(), 2);

        let newest = db.list_messages_for_agent(agent.id, 1, None).unwrap()[0].id;
        handle_messages_command(MessagesCommand::Delete { id: newest }, &config, false).unwrap();
        assert_eq!(db.agent_message_count(agent.id).unwrap(), 1);
        assert_eq!(db.user_message_count(user.id).unwrap(), 1);

        handle_users_command(UsersCommand::Remove { wallet: USER.to_string() }, &config, false).unwrap();
        assert_eq!(db.message_stats().unwrap().messages, 0);
        assert!(db.get_agent_by_address(AGENT).unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_input() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        assert!(handle_users_command(
            UsersCommand::Add { wallet: "0x1234".to_string() },
            &config,
            false
        )
        .is_err());

        // unknown agent
        assert!(handle_messages_command(
            MessagesCommand::Log {
                agent_address: AGENT.to_string(),
                role: "user".to_string(),
                content: "hi".to_string(),
            },
            &config,
            false
        )
        .is_err());

        handle_agents_command(
            AgentsCommand::Add {
                user_wallet: USER.to_string(),
                agent_address: AGENT.to_string(),
                name: None,
            },
            &config,
            false,
        )
        .unwrap();

        // unknown role
        assert!(handle_messages_command(
            MessagesCommand::Log {
                agent_address: AGENT.to_string(),
                role: "operator".to_string(),
                content: "hi".to_string(),
            },
            &config,
            false
        )
        .is_err());
    }
}
