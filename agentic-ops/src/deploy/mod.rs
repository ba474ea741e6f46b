//! Contract migration runner
//!
//! Ordered migration files (`NNN_name.toml`) deploy contracts, wire their
//! addresses into registries and assert on the result. Progress is recorded
//! in a per-network JSON manifest so runs are resumable and idempotent.

pub mod args;
pub mod chain;
pub mod manifest;
pub mod plan;
pub mod rpc_chain;
pub mod runner;
pub mod simulated;

pub use chain::Chain;
pub use manifest::Manifest;
pub use plan::{load_migrations, Migration};
pub use rpc_chain::RpcChain;
pub use runner::{migration_status, MigrationState, Runner};
pub use simulated::SimulatedChain;

use serde_json::Value;
use thiserror::Error;

/// Failures reported by a chain backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("ABI error: {0}")]
    Abi(String),
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Timed out: {0}")]
    Timeout(String),
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid migration file {file}: {reason}")]
    InvalidMigration { file: String, reason: String },
    #[error("Migration number {0} is used by more than one file")]
    DuplicateMigration(u32),
    #[error("Artifact error: {0}")]
    Artifact(String),
    #[error("Unknown contract '{0}' (not in the deployment manifest)")]
    UnknownContract(String),
    #[error("Unknown network parameter '{0}'")]
    UnknownParam(String),
    #[error("'{0}' is already deployed (set replace = true to redeploy)")]
    AlreadyDeployed(String),
    #[error("Manifest is for chain {manifest} but the network reports chain {network}")]
    ChainMismatch { manifest: u64, network: u64 },
    #[error("Migration history mismatch: {0}")]
    HistoryMismatch(String),
    #[error("Migration {in_progress} is in progress but the next pending migration is {next:?}")]
    InProgressMismatch { in_progress: u32, next: Option<u32> },
    #[error("Check {function} failed: expected {expected}, got {actual}")]
    CheckFailed {
        function: String,
        expected: Value,
        actual: Value,
    },
    #[error("Migration {migration} failed at step {step}: {source}")]
    StepFailed {
        migration: String,
        step: usize,
        #[source]
        source: Box<DeployError>,
    },
}

impl DeployError {
    /// The innermost error, looking through `StepFailed` wrappers
    pub fn root(&self) -> &DeployError {
        match self {
            DeployError::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the failure was a contract revert
    pub fn is_revert(&self) -> bool {
        matches!(self.root(), DeployError::Chain(ChainError::Reverted(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_and_is_revert_look_through_step_failures() {
        let err = DeployError::StepFailed {
            migration: "001_core".to_string(),
            step: 2,
            source: Box::new(DeployError::Chain(ChainError::Reverted("no perms".to_string()))),
        };
        assert!(err.is_revert());
        assert_eq!(
            err.to_string(),
            "Migration 001_core failed at step 2: execution reverted: no perms"
        );
        assert!(!DeployError::UnknownParam("weth".into()).is_revert());
    }
}
