//! Network Configuration
//!
//! Loads deployment targets from config/networks.ron. Each network carries its
//! chain id, an RPC endpoint and the named parameters that migration files
//! reference with `$name` (token addresses, protocol addresses, delays).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// A single network entry in networks.ron
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    /// RPC endpoint (can be overridden with `<NETWORK>_RPC_URL`)
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Block explorer base URL, used for log output only
    #[serde(default)]
    pub explorer_url: Option<String>,
    /// Named values available to migration files as `$name`
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

/// A network with its RPC endpoint resolved
#[derive(Debug, Clone)]
pub struct ResolvedNetwork {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: Option<String>,
    pub explorer_url: Option<String>,
    pub params: BTreeMap<String, Value>,
}

impl ResolvedNetwork {
    /// Explorer link for a transaction hash, if an explorer is configured
    pub fn tx_link(&self, tx_hash: &str) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }
}

/// Best free public RPC URL per network (last resort).
fn public_rpc_url(network: &str) -> Option<&'static str> {
    match network {
        "base" => Some("https://mainnet.base.org"),
        "mainnet" => Some("https://eth.llamarpc.com"),
        "base-sepolia" => Some("https://sepolia.base.org"),
        "local" => Some("http://127.0.0.1:8545"),
        _ => None,
    }
}

/// Environment variable that overrides the RPC endpoint of a network
pub fn rpc_override_var(network: &str) -> String {
    format!("{}_RPC_URL", network.to_uppercase().replace('-', "_"))
}

/// Load network definitions from a RON file, falling back to defaults if the file is missing
pub fn load_networks(path: &Path) -> Result<HashMap<String, NetworkConfig>, String> {
    if !path.exists() {
        log::info!("[networks] No {} found, using defaults", path.display());
        return Ok(default_networks());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let networks = ron::from_str::<HashMap<String, NetworkConfig>>(&content)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;

    log::info!(
        "[networks] Loaded {} networks from config: {:?}",
        networks.len(),
        networks.keys().collect::<Vec<_>>()
    );
    Ok(networks)
}

/// Default networks (local dev node only)
fn default_networks() -> HashMap<String, NetworkConfig> {
    let mut networks = HashMap::new();
    networks.insert(
        "local".to_string(),
        NetworkConfig {
            chain_id: 31337,
            rpc_url: Some("http://127.0.0.1:8545".to_string()),
            explorer_url: None,
            params: BTreeMap::new(),
        },
    );
    networks
}

/// Resolve a network by name. RPC priority: env override → config → public endpoint.
pub fn resolve_network(
    networks: &HashMap<String, NetworkConfig>,
    name: &str,
) -> Result<ResolvedNetwork, String> {
    let config = networks.get(name).ok_or_else(|| {
        let mut known: Vec<&String> = networks.keys().collect();
        known.sort();
        format!("Unknown network '{}'. Configured networks: {:?}", name, known)
    })?;

    let rpc_url = std::env::var(rpc_override_var(name))
        .ok()
        .filter(|url| !url.is_empty())
        .or_else(|| config.rpc_url.clone())
        .or_else(|| public_rpc_url(name).map(|s| s.to_string()));

    Ok(ResolvedNetwork {
        name: name.to_string(),
        chain_id: config.chain_id,
        rpc_url,
        explorer_url: config.explorer_url.clone(),
        params: config.params.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const NETWORKS_RON: &str = r#"{
        "base": (
            chain_id: 8453,
            rpc_url: Some("https://base.example/rpc"),
            explorer_url: Some("https://basescan.org/"),
            params: {
                "weth": "0x4200000000000000000000000000000000000006",
                "registry_change_delay": 0,
            },
        ),
        "testnet-x": (
            chain_id: 99,
        ),
    }"#;

    #[test]
    fn test_load_networks_from_ron() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("networks.ron");
        fs::write(&path, NETWORKS_RON).unwrap();

        let networks = load_networks(&path).unwrap();
        assert_eq!(networks.len(), 2);
        let base = &networks["base"];
        assert_eq!(base.chain_id, 8453);
        assert_eq!(
            base.params["weth"],
            Value::String("0x4200000000000000000000000000000000000006".to_string())
        );
        assert_eq!(base.params["registry_change_delay"], serde_json::json!(0));
        assert!(networks["testnet-x"].params.is_empty());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let networks = load_networks(&dir.path().join("nope.ron")).unwrap();
        assert_eq!(networks["local"].chain_id, 31337);
    }

    #[test]
    fn test_resolve_unknown_network() {
        let err = resolve_network(&default_networks(), "nowhere").unwrap_err();
        assert!(err.contains("Unknown network 'nowhere'"));
    }

    #[test]
    fn test_resolve_network_and_tx_link() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("networks.ron");
        fs::write(&path, NETWORKS_RON).unwrap();
        let networks = load_networks(&path).unwrap();

        let base = resolve_network(&networks, "base").unwrap();
        assert_eq!(base.chain_id, 8453);
        assert_eq!(
            base.tx_link("0xabc").as_deref(),
            Some("https://basescan.org/tx/0xabc")
        );

        let other = resolve_network(&networks, "testnet-x").unwrap();
        assert!(other.tx_link("0xabc").is_none());
    }

    #[test]
    fn test_rpc_override_var() {
        assert_eq!(rpc_override_var("base-sepolia"), "BASE_SEPOLIA_RPC_URL");
    }
}
