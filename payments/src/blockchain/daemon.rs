/// Chain daemon seam - the wallet-enabled coin daemon the payment processor talks to.
///
/// The pipeline only ever sees this trait; the HTTP transport (`DaemonRpcClient`) lives in
/// `rpc_client.rs` and tests drive the pipeline with a scripted double.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::RpcError;

/// One command of a batched call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub params: Value,
}

impl RpcCall {
    pub fn new(method: &str, params: Value) -> Self {
        Self { method: method.to_string(), params }
    }
}

/// JSON-RPC error object as returned by bitcoind-family daemons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Per-command outcome of a batched call, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcReply {
    pub result: Option<Value>,
    pub error: Option<RpcErrorObject>,
}

impl RpcReply {
    pub fn ok(result: Value) -> Self {
        Self { result: Some(result), error: None }
    }

    pub fn err(code: i64, message: &str) -> Self {
        Self {
            result: None,
            error: Some(RpcErrorObject { code, message: message.to_string() }),
        }
    }

    /// `result`, treating JSON `null` as absent.
    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().filter(|v| !v.is_null())
    }
}

/// `validateaddress` answer; only the fields the processor needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressInfo {
    #[serde(default)]
    pub isvalid: bool,
    #[serde(default)]
    pub ismine: bool,
}

#[async_trait]
pub trait ChainDaemon: Send + Sync {
    async fn validate_address(&self, address: &str) -> Result<AddressInfo, RpcError>;

    /// Wallet balance as a decimal that keeps the daemon's textual scale
    /// (`"12.50000000"` has scale 8).
    async fn get_balance(&self) -> Result<Decimal, RpcError>;

    /// Ordered batch; the reply vector has one entry per call, in call order.
    async fn batch(&self, calls: &[RpcCall]) -> Result<Vec<RpcReply>, RpcError>;

    /// `sendmany(account, {address: amount})`, returning the txid.
    async fn send_many(
        &self,
        account: &str,
        amounts: &BTreeMap<String, Decimal>,
    ) -> Result<String, RpcError>;
}

/// Parses a daemon number literal (`"0.00100000"`, `"1e-8"`) into a `Decimal`,
/// keeping the literal's scale.
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let text = text.trim().trim_matches('"');
    text.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(text).ok())
}

/// Decimal view of a JSON number or numeric string.
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}
