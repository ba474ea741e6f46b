//! EVM JSON-RPC client
//!
//! Thin typed wrapper over the handful of `eth_*` methods a deployment needs.

use ethers::types::{Address, Bytes, H256, U256, U64};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Value,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Transaction receipt from eth_getTransactionReceipt
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: H256,
    pub block_number: Option<U64>,
    pub status: Option<U64>,
    pub gas_used: Option<U256>,
    pub contract_address: Option<Address>,
}

impl TransactionReceipt {
    /// Post-Byzantium status flag; a missing status is treated as success
    pub fn succeeded(&self) -> bool {
        self.status.map(|s| !s.is_zero()).unwrap_or(true)
    }
}

fn parse_hex_u256(result: &Value, what: &str) -> Result<U256, String> {
    let hex_str = result.as_str()
        .ok_or_else(|| format!("Invalid {} response", what))?;
    U256::from_str_radix(hex_str.trim_start_matches("0x"), 16)
        .map_err(|e| format!("Failed to parse {}: {}", what, e))
}

pub struct EvmRpc {
    client: reqwest::Client,
    url: String,
}

impl EvmRpc {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, String> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id: 1,
        };

        log::debug!("[rpc] {} to {} with params: {:?}", method, self.url, request.params);

        let response = self.client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("RPC request to {} failed: {}", self.url, e))?;

        let status = response.status();
        let body = response.text().await
            .map_err(|e| format!("Failed to read response: {}", e))?;

        if !status.is_success() {
            return Err(format!("RPC error ({}) from {}: {}", status, self.url, if body.is_empty() { "empty response" } else { &body }));
        }

        let rpc_response: JsonRpcResponse = serde_json::from_str(&body)
            .map_err(|e| format!("Failed to parse RPC response: {} - body: {}", e, body))?;

        if let Some(error) = rpc_response.error {
            return Err(format!("RPC error {}: {}", error.code, error.message));
        }

        rpc_response.result.ok_or_else(|| "RPC returned null result".to_string())
    }

    /// Chain id reported by the node
    pub async fn chain_id(&self) -> Result<u64, String> {
        let result = self.rpc_call("eth_chainId", json!([])).await?;
        Ok(parse_hex_u256(&result, "chainId")?.as_u64())
    }

    /// Make an eth_call (read-only contract call)
    pub async fn eth_call(&self, from: Option<Address>, to: Address, data: &[u8]) -> Result<Bytes, String> {
        let mut call = json!({
            "to": format!("{:?}", to),
            "data": format!("0x{}", hex::encode(data))
        });
        if let Some(from) = from {
            call["from"] = json!(format!("{:?}", from));
        }

        let result = self.rpc_call("eth_call", json!([call, "latest"])).await?;

        let hex_str = result.as_str()
            .ok_or_else(|| "Invalid eth_call response".to_string())?;

        let bytes = hex::decode(hex_str.trim_start_matches("0x"))
            .map_err(|e| format!("Failed to decode eth_call result: {}", e))?;

        Ok(Bytes::from(bytes))
    }

    /// Deployed bytecode at an address ("0x" for accounts without code)
    pub async fn get_code(&self, address: Address) -> Result<Bytes, String> {
        let result = self.rpc_call("eth_getCode", json!([format!("{:?}", address), "latest"])).await?;
        let hex_str = result.as_str()
            .ok_or_else(|| "Invalid getCode response".to_string())?;
        let bytes = hex::decode(hex_str.trim_start_matches("0x"))
            .map_err(|e| format!("Failed to decode code: {}", e))?;
        Ok(Bytes::from(bytes))
    }

    /// Estimate gas for a transaction. `to = None` estimates a contract creation.
    pub async fn estimate_gas(
        &self,
        from: Address,
        to: Option<Address>,
        data: &[u8],
    ) -> Result<U256, String> {
        let mut tx = json!({
            "from": format!("{:?}", from),
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(to) = to {
            tx["to"] = json!(format!("{:?}", to));
        }

        let result = self.rpc_call("eth_estimateGas", json!([tx])).await?;
        parse_hex_u256(&result, "gas estimate")
    }

    /// Estimate EIP-1559 fees (max_fee_per_gas, max_priority_fee_per_gas)
    pub async fn estimate_eip1559_fees(&self) -> Result<(U256, U256), String> {
        let gas_price = parse_hex_u256(&self.rpc_call("eth_gasPrice", json!([])).await?, "gas price")?;
        let priority_fee = parse_hex_u256(
            &self.rpc_call("eth_maxPriorityFeePerGas", json!([])).await?,
            "priority fee",
        )?;

        // Some providers return priority fees above the gas price; cap it
        let capped_priority_fee = std::cmp::min(priority_fee, gas_price);
        let max_fee = gas_price + gas_price / 10;

        log::debug!(
            "[rpc] Gas estimate: gas_price={}, priority_fee={} (capped from {}), max_fee={}",
            gas_price, capped_priority_fee, priority_fee, max_fee
        );

        Ok((max_fee, capped_priority_fee))
    }

    /// Send a raw signed transaction
    pub async fn send_raw_transaction(&self, signed_tx: &[u8]) -> Result<H256, String> {
        let params = json!([format!("0x{}", hex::encode(signed_tx))]);
        let result = self.rpc_call("eth_sendRawTransaction", params).await?;

        let hash_hex = result.as_str()
            .ok_or_else(|| "Invalid sendRawTransaction response".to_string())?;

        hash_hex.parse()
            .map_err(|e| format!("Failed to parse tx hash: {}", e))
    }

    /// Get transaction receipt
    pub async fn get_transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>, String> {
        let params = json!([format!("{:?}", tx_hash)]);

        let result = match self.rpc_call("eth_getTransactionReceipt", params).await {
            Ok(result) => result,
            Err(e) if e == "RPC returned null result" => return Ok(None),
            Err(e) => return Err(e),
        };

        let receipt: TransactionReceipt = serde_json::from_value(result)
            .map_err(|e| format!("Failed to parse receipt: {}", e))?;

        Ok(Some(receipt))
    }

    /// Get transaction count (nonce) for an address
    pub async fn get_transaction_count(&self, address: Address) -> Result<U256, String> {
        let params = json!([format!("{:?}", address), "pending"]);
        let result = self.rpc_call("eth_getTransactionCount", params).await?;
        parse_hex_u256(&result, "nonce")
    }

    /// Wait for a transaction receipt with polling
    pub async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        timeout: Duration,
    ) -> Result<TransactionReceipt, String> {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_secs(2);

        loop {
            if start.elapsed() > timeout {
                return Err(format!("Timeout waiting for tx receipt: {:?}", tx_hash));
            }

            match self.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {
                    log::debug!("[rpc] Waiting for receipt of {:?}...", tx_hash);
                    tokio::time::sleep(poll_interval).await;
                }
                Err(e) => {
                    log::warn!("[rpc] Error fetching receipt: {}, retrying...", e);
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}
