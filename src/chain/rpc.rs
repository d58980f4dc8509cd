// =============================================================================
// CROSSFILL - JSON-RPC Transport
// =============================================================================
//
// Blocking ureq client shared by the EVM and Sui adapters. Async callers go
// through `call`, which moves the HTTP round-trip onto the blocking pool.
//
// =============================================================================

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::ChainError;

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
    #[serde(default)]
    data: Option<Value>,
}

struct RpcInner {
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

/// How a call failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallFailure {
    /// The node answered with an error; the call had no effect
    Rejected(String),
    /// No usable answer; the request may still have reached the node
    NoAnswer(String),
}

impl CallFailure {
    pub fn into_chain_error(self) -> ChainError {
        match self {
            CallFailure::Rejected(s) | CallFailure::NoAnswer(s) => ChainError::Rpc(s),
        }
    }
}

/// JSON-RPC 2.0 client
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<RpcInner>,
}

impl RpcClient {
    pub fn new(url: &str, timeout: Duration) -> Self {
        RpcClient {
            inner: Arc::new(RpcInner {
                url: url.to_string(),
                timeout,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// One blocking round-trip
    pub fn call_blocking(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        self.round_trip(method, params).map_err(CallFailure::into_chain_error)
    }

    fn round_trip(&self, method: &str, params: Value) -> Result<Value, CallFailure> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = match ureq::post(&self.inner.url).timeout(self.inner.timeout).send_json(body) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) if code < 500 => {
                return Err(CallFailure::Rejected(format!("{}: HTTP {}", method, code)))
            }
            Err(e) => return Err(CallFailure::NoAnswer(format!("{}: {}", method, e))),
        };

        let parsed: RpcResponse = response
            .into_json()
            .map_err(|e| CallFailure::NoAnswer(format!("{}: bad response: {}", method, e)))?;

        if let Some(err) = parsed.error {
            let detail = err
                .data
                .map(|d| format!(" {}", d))
                .unwrap_or_default();
            return Err(CallFailure::Rejected(format!(
                "{}: {} ({}){}",
                method, err.message, err.code, detail
            )));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    /// Async round-trip on the blocking pool
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        self.try_call(method, params).await.map_err(CallFailure::into_chain_error)
    }

    /// Async round-trip that keeps a node's answer apart from no answer
    pub async fn try_call(&self, method: &str, params: Value) -> Result<Value, CallFailure> {
        let client = self.clone();
        let method_owned = method.to_string();
        tokio::task::spawn_blocking(move || client.round_trip(&method_owned, params))
            .await
            .map_err(|e| CallFailure::NoAnswer(format!("{}: task failed: {}", method, e)))?
    }

    /// Async round-trip, result deserialized into `T`
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| ChainError::Rpc(format!("{}: {}", method, e)))
    }
}

/// Parse an EVM hex quantity ("0x1a")
pub fn parse_quantity(v: &Value) -> Result<u128, ChainError> {
    let s = v
        .as_str()
        .ok_or_else(|| ChainError::Rpc(format!("expected hex quantity, got {}", v)))?;
    crate::amount::parse_amount(s).map_err(|e| ChainError::Rpc(e.to_string()))
}

/// Parse a 0x-prefixed hex blob
pub fn parse_hex_bytes(v: &Value) -> Result<Vec<u8>, ChainError> {
    let s = v
        .as_str()
        .ok_or_else(|| ChainError::Rpc(format!("expected hex data, got {}", v)))?;
    let raw = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(raw).map_err(|e| ChainError::Rpc(format!("bad hex data: {}", e)))
}

/// Parse a 32-byte hex word
pub fn parse_word(v: &Value) -> Result<[u8; 32], ChainError> {
    let bytes = parse_hex_bytes(v)?;
    bytes
        .try_into()
        .map_err(|_| ChainError::Rpc("expected 32-byte word".into()))
}

/// Format a number as an EVM hex quantity
pub fn to_quantity(v: u128) -> String {
    format!("0x{:x}", v)
}

// =============================================================================
// Tests
// =============================================================================
