use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Error object returned by an EIP-1193 / JSON-RPC provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("provider error {code}: {message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const REQUEST_PENDING: i64 = -32002;
    pub const INTERNAL: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }
}

/// Request/response transport to a wallet or node.
///
/// The wallet side answers account, chain-switch and signing requests;
/// node-side readers answer `eth_call`, logs and receipts.
#[async_trait]
pub trait RpcProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;
}

/// JSON-RPC 2.0 over HTTP.
pub struct HttpProvider {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpProvider {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create RPC HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RpcProvider for HttpProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(url = %self.url, method, id, "rpc request");

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::internal(format!("rpc transport: {e}")))?;
        let json: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::internal(format!("rpc response: {e}")))?;

        if let Some(error) = json.get("error") {
            let code = error["code"].as_i64().unwrap_or(ProviderError::INTERNAL);
            let message = error["message"].as_str().unwrap_or("unknown error").to_string();
            return Err(ProviderError::new(code, message));
        }
        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }
}
