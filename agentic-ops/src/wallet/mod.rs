//! Deployer wallet abstraction
//!
//! Deployments are signed by a single key. The provider trait keeps the live
//! chain independent of where that key comes from; today only the
//! environment-backed provider exists.

mod env_provider;

pub use env_provider::EnvWalletProvider;

use async_trait::async_trait;
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Signature};

/// Trait for wallet providers - abstracts how deployment transactions get signed
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Sign a typed transaction
    async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Signature, String>;

    /// Signer address
    fn address(&self) -> Address;

    /// Lowercase hex address for display
    fn get_address(&self) -> String {
        format!("{:?}", self.address()).to_lowercase()
    }

    /// Get the mode name for logging
    fn mode_name(&self) -> &'static str;
}
