//! Chain abstraction used by the migration runner

use super::ChainError;
use crate::web3::ContractArtifact;
use async_trait::async_trait;
use ethers::abi::{Function, Token};
use ethers::types::{Address, H256};

#[derive(Debug, Clone, PartialEq)]
pub struct DeployReceipt {
    pub address: Address,
    pub tx_hash: H256,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
}

/// A chain the runner can deploy to. Every state-changing call comes from `deployer()`.
#[async_trait]
pub trait Chain: Send + Sync {
    fn deployer(&self) -> Address;

    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Deploy an artifact with already-encoded constructor arguments
    async fn deploy(&self, artifact: &ContractArtifact, args: &[Token]) -> Result<DeployReceipt, ChainError>;

    /// Send a state-changing transaction and wait for it to be mined
    async fn send(&self, to: Address, function: &Function, args: &[Token]) -> Result<TxReceipt, ChainError>;

    /// Read-only call; returns the decoded outputs
    async fn call(&self, to: Address, function: &Function, args: &[Token]) -> Result<Vec<Token>, ChainError>;

    async fn has_code(&self, address: Address) -> Result<bool, ChainError>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
