//! `agentic-ops deploy` subcommands: contract migrations per network.

use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use ethers::types::Address;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::print_json;
use crate::config::{env_vars, Config};
use crate::deploy::{
    load_migrations, migration_status, Chain, Manifest, Migration, MigrationState, RpcChain, Runner,
    SimulatedChain,
};
use crate::networks::{load_networks, resolve_network, rpc_override_var, ResolvedNetwork};
use crate::wallet::{EnvWalletProvider, WalletProvider};
use crate::web3::{token_to_value, ArtifactStore};

/// Hardhat account #0; dry runs use it when no deployer key is configured
const DEFAULT_DRY_RUN_DEPLOYER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

#[derive(Subcommand)]
pub enum DeployCommand {
    /// Apply pending migrations to the selected network.
    Run {
        /// Stop after this migration number.
        #[arg(long)]
        to: Option<u32>,

        /// Execute against a simulated fork; the manifest is not written.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show applied, in-progress and pending migrations.
    Status,

    /// List deployed contract addresses from the manifest.
    Addresses,

    /// Check that code exists at every manifest address.
    Verify,
}

pub async fn handle_deploy_command(cmd: DeployCommand, config: &Config, json: bool) -> Result<()> {
    match cmd {
        DeployCommand::Run { to, dry_run } => run(config, to, dry_run, json).await,
        DeployCommand::Status => status(config, json),
        DeployCommand::Addresses => addresses(config, json),
        DeployCommand::Verify => verify(config, json).await,
    }
}

fn network(config: &Config) -> Result<ResolvedNetwork> {
    let networks = load_networks(&config.networks_file).map_err(anyhow::Error::msg)?;
    resolve_network(&networks, &config.network).map_err(anyhow::Error::msg)
}

fn rpc_url(network: &ResolvedNetwork) -> Result<String> {
    network.rpc_url.clone().ok_or_else(|| {
        anyhow!(
            "No RPC endpoint for network '{}' (set {})",
            network.name,
            rpc_override_var(&network.name)
        )
    })
}

fn manifest(config: &Config, network: &ResolvedNetwork) -> Result<Manifest> {
    let path = config.manifest_path(&network.name);
    Manifest::load_or_new(&path, &network.name, network.chain_id)
        .with_context(|| format!("Failed to load manifest {}", path.display()))
}

fn migrations(config: &Config) -> Result<Vec<Migration>> {
    load_migrations(&config.migrations_dir)
        .with_context(|| format!("Failed to load migrations from {}", config.migrations_dir.display()))
}

fn dry_run_deployer(config: &Config) -> Result<Address> {
    let address = config
        .deployer_address
        .as_deref()
        .unwrap_or(DEFAULT_DRY_RUN_DEPLOYER);
    address
        .parse()
        .map_err(|e| anyhow!("Invalid deployer address {}: {}", address, e))
}

async fn run(config: &Config, to: Option<u32>, dry_run: bool, json: bool) -> Result<()> {
    let network = network(config)?;
    let migrations = migrations(config)?;
    let manifest = manifest(config, &network)?;
    let mut artifacts = ArtifactStore::new(&config.artifacts_dir);

    let mut simulated = None;
    let (chain, persist_to): (Arc<dyn Chain>, Option<PathBuf>) = if dry_run {
        let sim = Arc::new(SimulatedChain::fork(
            &manifest,
            &migrations,
            &network.params,
            &mut artifacts,
            dry_run_deployer(config)?,
        )?);
        simulated = Some(sim.clone());
        let chain: Arc<dyn Chain> = sim;
        (chain, None)
    } else {
        let key = config
            .deployer_private_key
            .as_deref()
            .ok_or_else(|| anyhow!("{} is not set", env_vars::DEPLOYER_PRIVATE_KEY))?;
        let wallet = EnvWalletProvider::from_private_key(key)
            .map_err(anyhow::Error::msg)?
            .with_chain_id(network.chain_id);
        log::info!(
            "[deploy] Deployer {} ({} wallet) on {}",
            wallet.get_address(),
            wallet.mode_name(),
            network.name
        );
        let chain: Arc<dyn Chain> = Arc::new(RpcChain::new(
            &rpc_url(&network)?,
            Arc::new(wallet),
            network.chain_id,
            Duration::from_secs(config.receipt_timeout_secs),
        ));
        (chain, Some(config.manifest_path(&network.name)))
    };

    let network_name = network.name.clone();
    let mut runner = Runner::new(chain, network, artifacts, manifest, persist_to);
    let summary = runner.run(&migrations, to).await.map_err(|e| {
        if e.is_revert() {
            log::error!("[deploy] A contract reverted; check that the deployer still holds governance");
        }
        e
    })?;

    if json {
        let transactions: Vec<_> = simulated
            .map(|sim| {
                sim.call_log()
                    .into_iter()
                    .map(|entry| {
                        serde_json::json!({
                            "block": entry.block_number,
                            "tx_hash": entry.tx_hash,
                            "from": entry.from,
                            "to": entry.to,
                            "contract": sim.artifact_at(entry.to),
                            "function": entry.function,
                            "args": entry.args.iter().map(token_to_value).collect::<Vec<_>>(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        return print_json(&serde_json::json!({
            "network": network_name,
            "dry_run": dry_run,
            "summary": summary,
            "contracts": runner.manifest().contracts,
            "transactions": transactions,
        }));
    }

    if let Some((number, step)) = summary.resumed_from {
        println!("Resumed migration {:03} after step {}", number, step);
    }
    if summary.applied.is_empty() {
        println!("{}: up to date", network_name);
    } else {
        println!(
            "{}: applied {:?} ({} steps, run {}){}",
            network_name,
            summary.applied,
            summary.steps_executed,
            summary.run_id,
            if dry_run { " [dry run, manifest not written]" } else { "" }
        );
    }
    if let Some(sim) = simulated {
        for entry in sim.call_log() {
            let contract = sim
                .artifact_at(entry.to)
                .unwrap_or_else(|| format!("{:?}", entry.to));
            println!("  #{:<4} {}.{}", entry.block_number, contract, entry.function);
        }
    }
    Ok(())
}

fn status(config: &Config, json: bool) -> Result<()> {
    let network = network(config)?;
    let manifest = manifest(config, &network)?;
    let statuses = migration_status(&manifest, &migrations(config)?)?;

    if json {
        return print_json(&serde_json::json!({
            "network": network.name,
            "chain_id": network.chain_id,
            "deployer": manifest.deployer,
            "migrations": statuses,
        }));
    }

    println!("{} (chain {})", network.name, network.chain_id);
    if let Some(deployer) = manifest.deployer {
        println!("deployer {:?}", deployer);
    }
    for status in statuses {
        let detail = match status.state {
            MigrationState::Applied => status
                .applied_at
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
            MigrationState::InProgress => {
                format!("{}/{} steps", status.completed_steps, status.total_steps)
            }
            MigrationState::Pending => format!("{} steps", status.total_steps),
        };
        println!(
            "  {:03} {:<28} {:<12} {}",
            status.number, status.name, status.state, detail
        );
    }
    Ok(())
}

fn addresses(config: &Config, json: bool) -> Result<()> {
    let network = network(config)?;
    let manifest = manifest(config, &network)?;

    if json {
        return print_json(&manifest.contracts);
    }
    if manifest.contracts.is_empty() {
        println!("{}: nothing deployed", network.name);
    }
    for (name, contract) in &manifest.contracts {
        let alias = if name != &contract.artifact {
            format!(" ({})", contract.artifact)
        } else {
            String::new()
        };
        println!("  {:<20} {:?}  migration {:03}{}", name, contract.address, contract.migration, alias);
    }
    Ok(())
}

async fn verify(config: &Config, json: bool) -> Result<()> {
    let network = network(config)?;
    let manifest = manifest(config, &network)?;
    let chain = RpcChain::read_only(&rpc_url(&network)?, network.chain_id);
    let artifacts = ArtifactStore::new(&config.artifacts_dir);

    let runner = Runner::new(Arc::new(chain), network, artifacts, manifest, None);
    let results = runner.verify().await?;
    let missing: Vec<&str> = results
        .iter()
        .filter(|r| !r.has_code)
        .map(|r| r.name.as_str())
        .collect();

    if json {
        print_json(&results)?;
    } else {
        for result in &results {
            println!(
                "  {:<20} {:?}  {}",
                result.name,
                result.address,
                if result.has_code { "ok" } else { "NO CODE" }
            );
        }
    }

    if !missing.is_empty() {
        bail!("No code at {} manifest address(es): {}", missing.len(), missing.join(", "));
    }
    Ok(())
}
