/// Blockchain RPC client for balance lookups
///
/// Speaks plain Ethereum JSON-RPC over HTTP POST to a single endpoint. Only the
/// two calls the fabric needs are implemented: `eth_getBalance` and
/// `eth_blockNumber` (used as a liveness probe).
use crate::blockchain::{Address, Wei};
use crate::errors::{WalletError, WalletResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Source of on-chain balances.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn get_balance(&self, address: &Address) -> WalletResult<Wei>;

    async fn ping(&self) -> WalletResult<()>;
}

/// HTTP client for blockchain RPC communication
pub struct BlockchainClient {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
#[allow(dead_code)] // fields are populated via serde; not all are read
struct JsonRpcResponse {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
    #[serde(default)]
    id: Value,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl BlockchainClient {
    /// Create a new blockchain client
    pub fn new(endpoint: &str, timeout: Duration) -> WalletResult<Self> {
        let endpoint = endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(WalletError::ConfigError(format!(
                "RPC endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(BlockchainClient {
            client,
            endpoint: endpoint.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Get current block number
    pub async fn get_block_number(&self) -> WalletResult<u64> {
        let result = self.rpc_call("eth_blockNumber", Value::Array(Vec::new())).await?;
        let quantity = result.as_str().ok_or_else(|| {
            WalletError::InvalidResponse("Block number is not a hex string".to_string())
        })?;

        let digits = quantity.strip_prefix("0x").ok_or_else(|| {
            WalletError::InvalidResponse(format!("Invalid block number format: {}", quantity))
        })?;
        u64::from_str_radix(digits, 16).map_err(|_| {
            WalletError::InvalidResponse(format!("Invalid block number format: {}", quantity))
        })
    }

    /// Make a JSON-RPC call to the node
    async fn rpc_call(&self, method: &'static str, params: Value) -> WalletResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WalletError::Timeout(format!("{} request timed out", method))
                } else {
                    WalletError::NetworkError(format!("HTTP request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(WalletError::NetworkError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse = response.json().await.map_err(|e| {
            WalletError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        if let Some(error) = rpc_response.error {
            return Err(WalletError::InvalidResponse(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        match rpc_response.result {
            Some(Value::Null) | None => Err(WalletError::InvalidResponse(
                "No result in RPC response".to_string(),
            )),
            Some(result) => Ok(result),
        }
    }
}

#[async_trait]
impl BalanceSource for BlockchainClient {
    async fn get_balance(&self, address: &Address) -> WalletResult<Wei> {
        let params = serde_json::json!([address.as_str(), "latest"]);
        let result = self.rpc_call("eth_getBalance", params).await?;
        let quantity = result.as_str().ok_or_else(|| {
            WalletError::InvalidResponse(format!("Balance is not a hex string: {}", result))
        })?;
        Wei::from_hex(quantity)
    }

    async fn ping(&self) -> WalletResult<()> {
        self.get_block_number().await.map(|_| ())
    }
}
