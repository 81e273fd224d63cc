//! EVM JSON-RPC backend
//!
//! Anchors are plain value-less transactions to a fixed address with the
//! payload reference as input data. Signing is left to the node
//! (`eth_sendTransaction` from an unlocked or managed account).

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{ChainError, Receipt};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug)]
pub struct RpcClient {
    client: Client,
    url: String,
    from: String,
    to: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(
        url: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            from: from.into(),
            to: to.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Http {
                status: status.as_u16(),
            });
        }

        let rpc: RpcResponse = response.json().await?;
        if let Some(err) = rpc.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        debug!(method, id, "RPC call succeeded");
        Ok(rpc.result.unwrap_or(Value::Null))
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    pub async fn send_anchor(&self, data: &[u8]) -> Result<String, ChainError> {
        let tx = json!({
            "from": self.from,
            "to": self.to,
            "value": "0x0",
            "data": format!("0x{}", hex::encode(data)),
        });
        let result = self.call("eth_sendTransaction", json!([tx])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::InvalidResponse(format!("expected tx hash, got {}", result)))
    }

    pub async fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, ChainError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }

        let block_number = match result.get("blockNumber").and_then(Value::as_str) {
            Some(hex) => parse_quantity(hex)?,
            // Receipt without a block is still pending on some nodes
            None => return Ok(None),
        };
        let success = match result.get("status").and_then(Value::as_str) {
            Some(status) => parse_quantity(status)? == 1,
            None => true,
        };
        Ok(Some(Receipt {
            block_number,
            success,
        }))
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| ChainError::InvalidResponse(format!("expected quantity, got {}", result)))?;
        parse_quantity(hex)
    }

    pub async fn transaction_input(&self, tx_hash: &str) -> Result<Vec<u8>, ChainError> {
        let result = self
            .call("eth_getTransactionByHash", json!([tx_hash]))
            .await?;
        if result.is_null() {
            return Err(ChainError::NotFound(tx_hash.to_string()));
        }
        let input = result
            .get("input")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::InvalidResponse("transaction has no input".to_string()))?;
        hex::decode(input.trim_start_matches("0x"))
            .map_err(|e| ChainError::InvalidResponse(format!("input is not hex: {}", e)))
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(value: &str) -> Result<u64, ChainError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("quantity '{}' lacks 0x prefix", value)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad quantity '{}': {}", value, e)))
}
