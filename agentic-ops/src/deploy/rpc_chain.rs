//! Live chain over JSON-RPC
//!
//! Transactions are EIP-1559, signed locally by the deployer wallet and
//! broadcast raw. Gas estimates get a 20% buffer.

use super::chain::{Chain, DeployReceipt, TxReceipt};
use super::ChainError;
use crate::wallet::WalletProvider;
use crate::web3::rpc::TransactionReceipt;
use crate::web3::{ContractArtifact, EvmRpc};
use async_trait::async_trait;
use ethers::abi::{Function, Token};
use ethers::types::transaction::eip1559::Eip1559TransactionRequest;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;

/// Map an RPC error string to a chain error; node-reported reverts become `Reverted`
fn classify_rpc_error(error: String) -> ChainError {
    let lower = error.to_lowercase();
    if !lower.contains("revert") {
        return ChainError::Rpc(error);
    }

    // "execution reverted: no perms" -> "no perms"
    let reason = lower
        .find("reverted:")
        .and_then(|idx| error.get(idx + "reverted:".len()..))
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or(error);
    ChainError::Reverted(reason)
}

pub struct RpcChain {
    rpc: EvmRpc,
    /// `None` for read-only use (status, verify)
    wallet: Option<Arc<dyn WalletProvider>>,
    chain_id: u64,
    receipt_timeout: Duration,
}

impl RpcChain {
    pub fn new(
        rpc_url: &str,
        wallet: Arc<dyn WalletProvider>,
        chain_id: u64,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            rpc: EvmRpc::new(rpc_url),
            wallet: Some(wallet),
            chain_id,
            receipt_timeout,
        }
    }

    /// A chain that can be read but not written to
    pub fn read_only(rpc_url: &str, chain_id: u64) -> Self {
        Self {
            rpc: EvmRpc::new(rpc_url),
            wallet: None,
            chain_id,
            receipt_timeout: Duration::ZERO,
        }
    }

    fn wallet(&self) -> Result<&Arc<dyn WalletProvider>, ChainError> {
        self.wallet
            .as_ref()
            .ok_or_else(|| ChainError::Signing("no deployer key configured".to_string()))
    }

    async fn send_transaction(&self, to: Option<Address>, data: Vec<u8>) -> Result<TransactionReceipt, ChainError> {
        let wallet = self.wallet()?;
        let from = wallet.address();

        let gas = self
            .rpc
            .estimate_gas(from, to, &data)
            .await
            .map_err(classify_rpc_error)?;
        let gas = gas * U256::from(120) / U256::from(100); // 20% buffer

        let nonce = self.rpc.get_transaction_count(from).await.map_err(ChainError::Rpc)?;
        let (max_fee, priority_fee) = self.rpc.estimate_eip1559_fees().await.map_err(ChainError::Rpc)?;

        log::info!(
            "[deploy] Sending tx: to={:?}, data_len={} bytes, gas={}, nonce={} via {}",
            to, data.len(), gas, nonce, self.rpc.url()
        );

        let mut tx = Eip1559TransactionRequest::new()
            .from(from)
            .data(data)
            .nonce(nonce)
            .gas(gas)
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(priority_fee)
            .chain_id(self.chain_id);
        if let Some(to) = to {
            tx = tx.to(to);
        }

        let typed_tx: TypedTransaction = tx.into();
        let signature = wallet
            .sign_transaction(&typed_tx)
            .await
            .map_err(ChainError::Signing)?;
        let signed_tx = typed_tx.rlp_signed(&signature);

        let tx_hash = self
            .rpc
            .send_raw_transaction(&signed_tx)
            .await
            .map_err(classify_rpc_error)?;
        log::info!("[deploy] Broadcast {:?}, waiting for receipt", tx_hash);

        let receipt = self
            .rpc
            .wait_for_receipt(tx_hash, self.receipt_timeout)
            .await
            .map_err(ChainError::Timeout)?;

        if !receipt.succeeded() {
            return Err(ChainError::Reverted(format!("transaction {:?} reverted", tx_hash)));
        }
        log::info!(
            "[deploy] Mined in block {}, gas used {}",
            block_of(&receipt),
            receipt.gas_used.unwrap_or_default()
        );
        Ok(receipt)
    }
}

fn block_of(receipt: &TransactionReceipt) -> u64 {
    receipt.block_number.map(|b| b.as_u64()).unwrap_or_default()
}

#[async_trait]
impl Chain for RpcChain {
    fn deployer(&self) -> Address {
        self.wallet
            .as_ref()
            .map(|w| w.address())
            .unwrap_or_default()
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.rpc.chain_id().await.map_err(ChainError::Rpc)
    }

    async fn deploy(&self, artifact: &ContractArtifact, args: &[Token]) -> Result<DeployReceipt, ChainError> {
        let data = artifact.encode_deploy(args).map_err(ChainError::Abi)?;
        let receipt = self.send_transaction(None, data).await?;

        let address = receipt.contract_address.ok_or_else(|| {
            ChainError::Rpc(format!(
                "receipt for {:?} has no contract address",
                receipt.transaction_hash
            ))
        })?;

        Ok(DeployReceipt {
            address,
            tx_hash: receipt.transaction_hash,
            block_number: block_of(&receipt),
        })
    }

    async fn send(&self, to: Address, function: &Function, args: &[Token]) -> Result<TxReceipt, ChainError> {
        let data = function
            .encode_input(args)
            .map_err(|e| ChainError::Abi(format!("Failed to encode {}: {}", function.name, e)))?;
        let receipt = self.send_transaction(Some(to), data).await?;

        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: block_of(&receipt),
        })
    }

    async fn call(&self, to: Address, function: &Function, args: &[Token]) -> Result<Vec<Token>, ChainError> {
        let data = function
            .encode_input(args)
            .map_err(|e| ChainError::Abi(format!("Failed to encode {}: {}", function.name, e)))?;

        let result = self
            .rpc
            .eth_call(self.wallet.as_ref().map(|w| w.address()), to, &data)
            .await
            .map_err(classify_rpc_error)?;

        if result.is_empty() && !function.outputs.is_empty() {
            return Err(ChainError::Reverted(format!(
                "{} returned no data (is {:?} a contract?)",
                function.name, to
            )));
        }

        function
            .decode_output(&result)
            .map_err(|e| ChainError::Abi(format!("Failed to decode {} output: {}", function.name, e)))
    }

    async fn has_code(&self, address: Address) -> Result<bool, ChainError> {
        let code = self.rpc.get_code(address).await.map_err(ChainError::Rpc)?;
        Ok(!code.is_empty())
    }

    fn name(&self) -> &'static str {
        "rpc"
    }
}
