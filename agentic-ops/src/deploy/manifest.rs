//! Deployment manifest: `<deployments_dir>/<network>.json`
//!
//! Records what has been deployed where, which migrations are applied and
//! how far an interrupted migration got.

use super::DeployError;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedContract {
    pub address: Address,
    /// Artifact the contract was built from
    pub artifact: String,
    pub tx_hash: H256,
    /// Migration number that deployed it
    pub migration: u32,
    pub deployed_at: DateTime<Utc>,
    /// Addresses this name pointed to before a `replace = true` redeploy, oldest first
    #[serde(default)]
    pub previous: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub number: u32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InProgress {
    pub number: u32,
    pub completed_steps: usize,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub network: String,
    pub chain_id: u64,
    #[serde(default)]
    pub deployer: Option<Address>,
    #[serde(default)]
    pub contracts: BTreeMap<String, DeployedContract>,
    #[serde(default)]
    pub applied: Vec<AppliedMigration>,
    #[serde(default)]
    pub in_progress: Option<InProgress>,
}

impl Manifest {
    pub fn new(network: &str, chain_id: u64) -> Self {
        Self {
            network: network.to_string(),
            chain_id,
            deployer: None,
            contracts: BTreeMap::new(),
            applied: Vec::new(),
            in_progress: None,
        }
    }

    /// Load the manifest at `path`, or start an empty one if none exists yet.
    /// Fails with `ChainMismatch` if the file belongs to another chain.
    pub fn load_or_new(path: &Path, network: &str, chain_id: u64) -> Result<Self, DeployError> {
        if !path.exists() {
            log::info!("[deploy] No manifest at {}, starting fresh", path.display());
            return Ok(Self::new(network, chain_id));
        }

        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&content)?;
        if manifest.chain_id != chain_id {
            return Err(DeployError::ChainMismatch {
                manifest: manifest.chain_id,
                network: chain_id,
            });
        }
        Ok(manifest)
    }

    /// Write to a temp file next to `path`, then rename over it
    pub fn save(&self, path: &Path) -> Result<(), DeployError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn is_applied(&self, number: u32) -> bool {
        self.applied.iter().any(|a| a.number == number)
    }

    pub fn applied_entry(&self, number: u32) -> Option<&AppliedMigration> {
        self.applied.iter().find(|a| a.number == number)
    }

    /// Record a deployment under `name`. An existing entry is only replaced when
    /// `replace` is set; its address is kept in `previous`.
    pub fn record_deploy(
        &mut self,
        name: &str,
        mut contract: DeployedContract,
        replace: bool,
    ) -> Result<(), DeployError> {
        if let Some(existing) = self.contracts.get(name) {
            if !replace {
                return Err(DeployError::AlreadyDeployed(name.to_string()));
            }
            let mut previous = existing.previous.clone();
            previous.push(existing.address);
            contract.previous = previous;
        }
        self.contracts.insert(name.to_string(), contract);
        Ok(())
    }
}
