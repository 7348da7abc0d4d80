//! Ethereum JSON-RPC client.
//!
//! Transactions are signed by the node for the configured `from` account;
//! the relayer never holds keys.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::retry::{retry_transient, retry_when, RetryPolicy, Transient};

pub type TxHash = String;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("could not reach node: {0}")]
    Connect(String),

    #[error("node request failed: {0}")]
    Transport(String),

    #[error("node returned HTTP {status}")]
    Http { status: u16 },

    #[error("node request timed out after {0:?}")]
    Timeout(Duration),

    #[error("node rejected call ({code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed node response: {0}")]
    Malformed(String),

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: TxHash },

    #[error("transaction {tx_hash} not mined after {polls} receipt polls")]
    Unconfirmed { tx_hash: TxHash, polls: u32 },
}

impl Transient for ChainError {
    fn is_transient(&self) -> bool {
        match self {
            ChainError::Connect(_) | ChainError::Transport(_) | ChainError::Timeout(_) => true,
            ChainError::Http { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        ChainError::Timeout(after)
    }
}

impl ChainError {
    /// The request provably never reached the node, so resending cannot duplicate it
    pub fn is_undelivered(&self) -> bool {
        matches!(self, ChainError::Connect(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub block_number: u64,
}

pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    policy: RetryPolicy,
    poll_interval: Duration,
    max_polls: u32,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            policy,
            poll_interval: Duration::from_secs(2),
            max_polls: 90,
        }
    }

    pub fn with_receipt_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    async fn call_once(&self, method: &str, params: &Value) -> Result<Value, ChainError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ChainError::Connect(e.to_string())
                } else {
                    ChainError::Transport(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(ChainError::Http { status: resp.status().as_u16() });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| ChainError::Malformed(format!("invalid JSON: {e}")))?;

        if let Some(error) = json.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error")
                .to_string();
            return Err(ChainError::Rpc { code, message });
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| ChainError::Malformed("response missing 'result' field".into()))
    }

    /// Read-only call, retried on transient failures
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        retry_transient(self.policy, method, || self.call_once(method, &params)).await
    }

    /// `eth_sendTransaction`; resent only when the node was never reached
    pub async fn send_transaction(&self, from: &str, to: &str, data: &[u8]) -> Result<TxHash, ChainError> {
        let params = serde_json::json!([{
            "from": from,
            "to": to,
            "data": crate::abi::to_hex_data(data),
        }]);

        let result = retry_when(self.policy, "eth_sendTransaction", ChainError::is_undelivered, || {
            self.call_once("eth_sendTransaction", &params)
        })
        .await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::Malformed("eth_sendTransaction returned non-string result".into()))
    }

    /// Poll `eth_getTransactionReceipt` until mined; status `0x0` is a revert
    pub async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Receipt, ChainError> {
        for poll in 0..self.max_polls {
            let receipt = self
                .call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
                .await?;

            if receipt.is_null() {
                debug!(tx_hash, poll, "receipt pending");
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let status = receipt.get("status").and_then(Value::as_str).unwrap_or("0x0");
            if parse_quantity(status) != Some(1) {
                return Err(ChainError::Reverted { tx_hash: tx_hash.to_string() });
            }

            let block_number = receipt
                .get("blockNumber")
                .and_then(Value::as_str)
                .and_then(parse_quantity)
                .unwrap_or(0);
            return Ok(Receipt { block_number });
        }

        Err(ChainError::Unconfirmed { tx_hash: tx_hash.to_string(), polls: self.max_polls })
    }
}

fn parse_quantity(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}
