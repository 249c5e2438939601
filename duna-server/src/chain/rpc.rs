//! Minimal Ethereum JSON-RPC client.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC endpoint returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("RPC error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("malformed RPC response: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// A mined transaction's receipt (the fields we read).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    /// `0x1` success, `0x0` reverted. Absent before Byzantium.
    pub status: Option<String>,
    pub contract_address: Option<String>,
    pub block_number: Option<String>,
}

impl Receipt {
    pub fn reverted(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x0") | Some("0x00"))
    }
}

/// Parse a JSON-RPC hex quantity such as `0x1a`.
pub fn parse_quantity(s: &str) -> Result<u128, RpcError> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::Malformed(format!("quantity without 0x prefix: {s}")))?;
    if digits.is_empty() {
        return Err(RpcError::Malformed("empty quantity".into()));
    }
    u128::from_str_radix(digits, 16).map_err(|e| RpcError::Malformed(format!("{s}: {e}")))
}

pub struct RpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Call `method` and deserialize its `result`.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let resp = self.http.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RpcError::Status(status));
        }
        let resp: RpcResponse = resp
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        if let Some(err) = resp.error {
            return Err(RpcError::Node {
                code: err.code,
                message: err.message,
            });
        }
        serde_json::from_value(resp.result.unwrap_or(Value::Null))
            .map_err(|e| RpcError::Malformed(format!("{method}: {e}")))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, RpcError> {
        let hex: String = self.call(method, params).await?;
        parse_quantity(&hex)
    }

    async fn quantity_u64(&self, method: &str, params: Value) -> Result<u64, RpcError> {
        let value = self.quantity(method, params).await?;
        u64::try_from(value)
            .map_err(|_| RpcError::Malformed(format!("{method}: {value:#x} does not fit in 64 bits")))
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        self.quantity_u64("eth_chainId", json!([])).await
    }

    pub async fn pending_nonce(&self, address: &str) -> Result<u64, RpcError> {
        self.quantity_u64("eth_getTransactionCount", json!([address, "pending"]))
            .await
    }

    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        self.quantity("eth_gasPrice", json!([])).await
    }

    /// Gas estimate for a contract creation from `from` with init code `data`.
    pub async fn estimate_creation_gas(&self, from: &str, data: &str) -> Result<u64, RpcError> {
        self.quantity_u64("eth_estimateGas", json!([{ "from": from, "data": data }]))
            .await
    }

    /// Submit a signed transaction; returns its hash.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        self.call(
            "eth_sendRawTransaction",
            json!([format!("0x{}", hex::encode(raw))]),
        )
        .await
    }

    /// `None` until the transaction is mined.
    pub async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, RpcError> {
        self.call("eth_getTransactionReceipt", json!([tx_hash])).await
    }
}
