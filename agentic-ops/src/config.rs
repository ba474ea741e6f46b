use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use std::env;
use std::path::PathBuf;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const NETWORK: &str = "AGENTIC_NETWORK";
    pub const MIGRATIONS_DIR: &str = "AGENTIC_MIGRATIONS_DIR";
    pub const ARTIFACTS_DIR: &str = "AGENTIC_ARTIFACTS_DIR";
    pub const DEPLOYMENTS_DIR: &str = "AGENTIC_DEPLOYMENTS_DIR";
    pub const NETWORKS_FILE: &str = "AGENTIC_NETWORKS_FILE";
    pub const DEPLOYER_PRIVATE_KEY: &str = "DEPLOYER_PRIVATE_KEY";
    pub const RECEIPT_TIMEOUT_SECS: &str = "AGENTIC_RECEIPT_TIMEOUT_SECS";
}

/// Default values
pub mod defaults {
    pub const DATABASE_URL: &str = "./.db/message_log.db";
    pub const NETWORK: &str = "local";
    pub const MIGRATIONS_DIR: &str = "migrations";
    pub const ARTIFACTS_DIR: &str = "artifacts";
    pub const DEPLOYMENTS_DIR: &str = "deployments";
    pub const NETWORKS_FILE: &str = "config/networks.ron";
    pub const RECEIPT_TIMEOUT_SECS: u64 = 120;
}

/// Returns the absolute path to the agentic-ops crate directory.
/// Uses CARGO_MANIFEST_DIR at compile time, so bundled migrations and
/// artifacts resolve regardless of the working directory at runtime.
pub fn crate_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Resolve a directory: env var as-is, otherwise the default joined onto crate_dir().
fn resolve_path(env_var: &str, default_name: &str) -> PathBuf {
    env::var(env_var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| crate_dir().join(default_name))
}

/// Get the deployer private key from environment
pub fn deployer_private_key() -> Option<String> {
    env::var(env_vars::DEPLOYER_PRIVATE_KEY).ok()
}

/// Derive the public address from a private key
pub fn derive_address_from_private_key(private_key: &str) -> Result<String, String> {
    let key_hex = private_key.strip_prefix("0x").unwrap_or(private_key);
    let key_bytes = hex::decode(key_hex)
        .map_err(|e| format!("Invalid private key hex: {}", e))?;

    if key_bytes.len() != 32 {
        return Err(format!("Private key must be 32 bytes, got {}", key_bytes.len()));
    }

    let signing_key = SigningKey::from_slice(&key_bytes)
        .map_err(|e| format!("Invalid private key: {}", e))?;

    let wallet = LocalWallet::from(signing_key);
    Ok(format!("{:?}", wallet.address()).to_lowercase())
}

/// Address shown by status commands; a bad key only warns
fn deployer_address_for(private_key: &str) -> Option<String> {
    derive_address_from_private_key(private_key)
        .map_err(|e| log::warn!("Failed to derive deployer address: {}", e))
        .ok()
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub network: String,
    pub migrations_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub deployments_dir: PathBuf,
    pub networks_file: PathBuf,
    pub deployer_private_key: Option<String>,
    pub deployer_address: Option<String>,
    pub receipt_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let deployer_private_key = deployer_private_key();

        let deployer_address = deployer_private_key.as_deref().and_then(deployer_address_for);

        Self {
            database_url: env::var(env_vars::DATABASE_URL)
                .unwrap_or_else(|_| defaults::DATABASE_URL.to_string()),
            network: env::var(env_vars::NETWORK)
                .unwrap_or_else(|_| defaults::NETWORK.to_string()),
            migrations_dir: resolve_path(env_vars::MIGRATIONS_DIR, defaults::MIGRATIONS_DIR),
            artifacts_dir: resolve_path(env_vars::ARTIFACTS_DIR, defaults::ARTIFACTS_DIR),
            deployments_dir: resolve_path(env_vars::DEPLOYMENTS_DIR, defaults::DEPLOYMENTS_DIR),
            networks_file: resolve_path(env_vars::NETWORKS_FILE, defaults::NETWORKS_FILE),
            deployer_private_key,
            deployer_address,
            receipt_timeout_secs: env::var(env_vars::RECEIPT_TIMEOUT_SECS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::RECEIPT_TIMEOUT_SECS),
        }
    }

    /// Path of the deployment manifest for a network
    pub fn manifest_path(&self, network: &str) -> PathBuf {
        self.deployments_dir.join(format!("{}.json", network))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_address_from_private_key() {
        // Hardhat account #0 (DO NOT USE IN PRODUCTION)
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        assert_eq!(
            derive_address_from_private_key(key).unwrap(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_derive_address_rejects_bad_hex() {
        assert!(derive_address_from_private_key("0xnothex").is_err());
    }

    #[test]
    fn test_short_or_long_key_is_an_error_not_a_panic() {
        assert!(derive_address_from_private_key("0xabcd").is_err());
        assert!(derive_address_from_private_key(&format!("0x{}", "11".repeat(33))).is_err());
        assert_eq!(deployer_address_for("0xabcd"), None);
        assert_eq!(
            deployer_address_for("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80")
                .as_deref(),
            Some("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266")
        );
    }

    #[test]
    fn test_manifest_path_uses_network_name() {
        let mut config = Config::from_env();
        config.deployments_dir = PathBuf::from("/tmp/deployments");
        assert_eq!(
            config.manifest_path("base"),
            PathBuf::from("/tmp/deployments/base.json")
        );
    }
}
