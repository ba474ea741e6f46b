//! Linear migration runner
//!
//! Applies pending migrations in order against a [`Chain`], persisting the
//! manifest after every completed step so an interrupted run resumes where it
//! stopped.

use super::args::{resolve_args, resolve_value, values_match, ResolveContext};
use super::chain::Chain;
use super::manifest::{AppliedMigration, DeployedContract, InProgress, Manifest};
use super::plan::{Migration, Step};
use super::DeployError;
use crate::networks::ResolvedNetwork;
use crate::web3::{tokens_to_value, values_to_tokens, ArtifactStore};
use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use strum::{AsRefStr, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Applied,
    InProgress,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub number: u32,
    pub name: String,
    pub state: MigrationState,
    pub applied_at: Option<DateTime<Utc>>,
    pub completed_steps: usize,
    pub total_steps: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub applied: Vec<u32>,
    pub steps_executed: usize,
    pub resumed_from: Option<(u32, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyResult {
    pub name: String,
    pub address: Address,
    pub has_code: bool,
}

/// Every applied migration must still exist under the same name
pub fn check_history(manifest: &Manifest, migrations: &[Migration]) -> Result<(), DeployError> {
    for applied in &manifest.applied {
        match migrations.iter().find(|m| m.number == applied.number) {
            None => {
                return Err(DeployError::HistoryMismatch(format!(
                    "applied migration {:03}_{} no longer exists",
                    applied.number, applied.name
                )))
            }
            Some(m) if m.name != applied.name => {
                return Err(DeployError::HistoryMismatch(format!(
                    "migration {:03} was applied as '{}' but is now '{}'",
                    applied.number, applied.name, m.name
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Applied, in-progress and pending state of every known migration
pub fn migration_status(manifest: &Manifest, migrations: &[Migration]) -> Result<Vec<MigrationStatus>, DeployError> {
    check_history(manifest, migrations)?;

    Ok(migrations
        .iter()
        .map(|m| {
            let applied = manifest.applied_entry(m.number);
            let in_progress = manifest
                .in_progress
                .as_ref()
                .filter(|ip| ip.number == m.number);
            let (state, completed_steps) = match (applied, in_progress) {
                (Some(_), _) => (MigrationState::Applied, m.steps.len()),
                (None, Some(ip)) => (MigrationState::InProgress, ip.completed_steps),
                (None, None) => (MigrationState::Pending, 0),
            };
            MigrationStatus {
                number: m.number,
                name: m.name.clone(),
                state,
                applied_at: applied.map(|a| a.applied_at),
                completed_steps,
                total_steps: m.steps.len(),
            }
        })
        .collect())
}

pub struct Runner {
    chain: Arc<dyn Chain>,
    network: ResolvedNetwork,
    artifacts: ArtifactStore,
    manifest: Manifest,
    /// Where the manifest is persisted; `None` for dry runs
    persist_to: Option<PathBuf>,
}

impl Runner {
    pub fn new(
        chain: Arc<dyn Chain>,
        network: ResolvedNetwork,
        artifacts: ArtifactStore,
        manifest: Manifest,
        persist_to: Option<PathBuf>,
    ) -> Self {
        Self {
            chain,
            network,
            artifacts,
            manifest,
            persist_to,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn is_dry_run(&self) -> bool {
        self.persist_to.is_none()
    }

    fn persist(&self) -> Result<(), DeployError> {
        if let Some(path) = &self.persist_to {
            self.manifest.save(path)?;
        }
        Ok(())
    }

    /// Apply pending migrations with number <= `target` (all when `None`)
    pub async fn run(&mut self, migrations: &[Migration], target: Option<u32>) -> Result<RunSummary, DeployError> {
        check_history(&self.manifest, migrations)?;

        let chain_id = self.chain.chain_id().await?;
        if chain_id != self.manifest.chain_id {
            return Err(DeployError::ChainMismatch {
                manifest: self.manifest.chain_id,
                network: chain_id,
            });
        }

        let deployer = self.chain.deployer();
        let recorded_deployer = self.manifest.deployer;
        match recorded_deployer {
            Some(recorded) if recorded != deployer => log::warn!(
                "[deploy] Manifest was written by {:?}, now deploying as {:?}",
                recorded, deployer
            ),
            None if !self.is_dry_run() => self.manifest.deployer = Some(deployer),
            _ => {}
        }

        let pending: Vec<&Migration> = migrations
            .iter()
            .filter(|m| !self.manifest.is_applied(m.number))
            .collect();

        let mut summary = RunSummary::default();
        let mut resume: Option<InProgress> = None;
        if let Some(ip) = self.manifest.in_progress.clone() {
            let next = pending.first().map(|m| m.number);
            if next != Some(ip.number) {
                return Err(DeployError::InProgressMismatch {
                    in_progress: ip.number,
                    next,
                });
            }
            log::info!(
                "[deploy] Resuming migration {:03} after step {}",
                ip.number, ip.completed_steps
            );
            summary.resumed_from = Some((ip.number, ip.completed_steps));
            resume = Some(ip);
        }

        summary.run_id = resume
            .as_ref()
            .map(|ip| ip.run_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let to_run: Vec<&Migration> = pending
            .into_iter()
            .filter(|m| target.map_or(true, |t| m.number <= t))
            .collect();
        if to_run.is_empty() {
            log::info!("[deploy] {} is up to date", self.network.name);
            return Ok(summary);
        }

        log::info!(
            "[deploy] Running {} migration(s) on {} (chain {}) via {} chain{}",
            to_run.len(),
            self.network.name,
            chain_id,
            self.chain.name(),
            if self.is_dry_run() { ", dry run" } else { "" }
        );

        for migration in to_run {
            let start = match &resume {
                Some(ip) if ip.number == migration.number => ip.completed_steps,
                _ => 0,
            };
            self.apply_migration(migration, start, &summary.run_id).await?;
            summary.steps_executed += migration.steps.len().saturating_sub(start);
            summary.applied.push(migration.number);
        }

        Ok(summary)
    }

    async fn apply_migration(&mut self, migration: &Migration, start: usize, run_id: &str) -> Result<(), DeployError> {
        log::info!(
            "[deploy] Migration {}{}",
            migration.id(),
            migration
                .description
                .as_deref()
                .map(|d| format!(": {}", d))
                .unwrap_or_default()
        );

        log::debug!("[deploy] Loaded from {}", migration.path.display());

        self.manifest.in_progress = Some(InProgress {
            number: migration.number,
            completed_steps: start,
            run_id: run_id.to_string(),
        });
        self.persist()?;

        for (index, step) in migration.steps.iter().enumerate().skip(start) {
            log::info!("[deploy]   step {}/{}: {}", index + 1, migration.steps.len(), step.describe());
            self.apply_step(migration, step)
                .await
                .map_err(|e| DeployError::StepFailed {
                    migration: migration.id(),
                    step: index + 1,
                    source: Box::new(e),
                })?;

            if let Some(ip) = self.manifest.in_progress.as_mut() {
                ip.completed_steps = index + 1;
            }
            self.persist()?;
        }

        self.manifest.in_progress = None;
        self.manifest.applied.push(AppliedMigration {
            number: migration.number,
            name: migration.name.clone(),
            applied_at: Utc::now(),
            run_id: run_id.to_string(),
        });
        self.persist()?;
        log::info!("[deploy] Applied {}", migration.id());
        Ok(())
    }

    async fn apply_step(&mut self, migration: &Migration, step: &Step) -> Result<(), DeployError> {
        let deployer = self.chain.deployer();
        match step {
            Step::Deploy {
                contract,
                args,
                replace,
                ..
            } => {
                let name = step.target();
                if self.manifest.contracts.contains_key(name) && !replace {
                    return Err(DeployError::AlreadyDeployed(name.to_string()));
                }

                let artifact = self.artifacts.load(contract).map_err(DeployError::Artifact)?;
                if !artifact.is_deployable() {
                    return Err(DeployError::Artifact(format!(
                        "'{}' has no bytecode and cannot be deployed",
                        contract
                    )));
                }

                let ctx = ResolveContext {
                    deployer,
                    contracts: &self.manifest.contracts,
                    params: &self.network.params,
                };
                let values = resolve_args(args, &ctx)?;
                let tokens = values_to_tokens(&values, &artifact.constructor_params())
                    .map_err(|e| DeployError::Artifact(format!("{} constructor: {}", contract, e)))?;

                let receipt = self.chain.deploy(&artifact, &tokens).await?;
                log::info!(
                    "[deploy]   {} deployed at {:?} (tx {:?}){}",
                    name,
                    receipt.address,
                    receipt.tx_hash,
                    self.network
                        .tx_link(&format!("{:?}", receipt.tx_hash))
                        .map(|link| format!(" {}", link))
                        .unwrap_or_default()
                );

                self.manifest.record_deploy(
                    name,
                    DeployedContract {
                        address: receipt.address,
                        artifact: contract.clone(),
                        tx_hash: receipt.tx_hash,
                        migration: migration.number,
                        deployed_at: Utc::now(),
                        previous: Vec::new(),
                    },
                    *replace,
                )
            }
            Step::Execute {
                contract,
                function,
                args,
            } => {
                let (address, artifact_name) = self.lookup(contract)?;
                let artifact = self.artifacts.load(&artifact_name).map_err(DeployError::Artifact)?;
                let func = artifact.function(function, args.len()).map_err(DeployError::Artifact)?;

                let ctx = ResolveContext {
                    deployer,
                    contracts: &self.manifest.contracts,
                    params: &self.network.params,
                };
                let values = resolve_args(args, &ctx)?;
                let params: Vec<_> = func.inputs.iter().map(|i| i.kind.clone()).collect();
                let tokens = values_to_tokens(&values, &params)
                    .map_err(|e| DeployError::Artifact(format!("{}.{}: {}", contract, function, e)))?;

                let receipt = self.chain.send(address, func, &tokens).await?;
                log::info!(
                    "[deploy]   {}.{} mined in block {} (tx {:?})",
                    contract, function, receipt.block_number, receipt.tx_hash
                );
                Ok(())
            }
            Step::Check {
                contract,
                function,
                args,
                expect,
            } => {
                let (address, artifact_name) = self.lookup(contract)?;
                let artifact = self.artifacts.load(&artifact_name).map_err(DeployError::Artifact)?;
                let func = artifact.function(function, args.len()).map_err(DeployError::Artifact)?;

                let ctx = ResolveContext {
                    deployer,
                    contracts: &self.manifest.contracts,
                    params: &self.network.params,
                };
                let values = resolve_args(args, &ctx)?;
                let expected = resolve_value(expect, &ctx)?;
                let params: Vec<_> = func.inputs.iter().map(|i| i.kind.clone()).collect();
                let tokens = values_to_tokens(&values, &params)
                    .map_err(|e| DeployError::Artifact(format!("{}.{}: {}", contract, function, e)))?;

                let outputs = self.chain.call(address, func, &tokens).await?;
                let actual = tokens_to_value(&outputs);
                if !values_match(&actual, &expected) {
                    return Err(DeployError::CheckFailed {
                        function: format!("{}.{}", contract, function),
                        expected,
                        actual,
                    });
                }
                log::debug!("[deploy]   {}.{} == {}", contract, function, actual);
                Ok(())
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<(Address, String), DeployError> {
        self.manifest
            .contracts
            .get(name)
            .map(|c| (c.address, c.artifact.clone()))
            .ok_or_else(|| DeployError::UnknownContract(name.to_string()))
    }

    /// Check that code exists at every address in the manifest
    pub async fn verify(&self) -> Result<Vec<VerifyResult>, DeployError> {
        let mut results = Vec::with_capacity(self.manifest.contracts.len());
        for (name, contract) in &self.manifest.contracts {
            let has_code = self.chain.has_code(contract.address).await?;
            if !has_code {
                log::warn!("[deploy] No code at {:?} for {}", contract.address, name);
            }
            results.push(VerifyResult {
                name: name.clone(),
                address: contract.address,
                has_code,
            });
        }
        Ok(results)
    }
}
