//! Environment-based wallet provider
//!
//! Holds the deployer key (read from DEPLOYER_PRIVATE_KEY by the config
//! layer) and signs locally with an ethers LocalWallet.

use async_trait::async_trait;
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Signature};

use super::WalletProvider;

pub struct EnvWalletProvider {
    wallet: LocalWallet,
}

impl EnvWalletProvider {
    /// Create provider from a private key string (with or without 0x)
    pub fn from_private_key(private_key: &str) -> Result<Self, String> {
        let key_hex = private_key.trim().strip_prefix("0x").unwrap_or(private_key.trim());

        let key_bytes = hex::decode(key_hex)
            .map_err(|e| format!("Invalid private key hex: {}", e))?;

        if key_bytes.len() != 32 {
            return Err(format!("Private key must be 32 bytes, got {}", key_bytes.len()));
        }

        let signing_key = SigningKey::from_slice(&key_bytes)
            .map_err(|e| format!("Invalid private key: {}", e))?;

        Ok(Self {
            wallet: LocalWallet::from(signing_key),
        })
    }

    /// Bind signatures to a chain id (EIP-155)
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.wallet = self.wallet.with_chain_id(chain_id);
        self
    }
}

#[async_trait]
impl WalletProvider for EnvWalletProvider {
    async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Signature, String> {
        self.wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| format!("Failed to sign transaction: {}", e))
    }

    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn mode_name(&self) -> &'static str {
        "env"
    }
}
