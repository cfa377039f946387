/// Daemon RPC Client - JSON-RPC over HTTP to the coin daemon's wallet
///
/// Single calls, ordered batch calls, a circuit breaker for transport failures and a
/// hard per-request timeout so an unresponsive daemon can't stall a payment cycle.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{header, Method, Request};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, value::RawValue, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::daemon::{parse_decimal, AddressInfo, ChainDaemon, RpcCall, RpcErrorObject, RpcReply};
use crate::config::DaemonConfig;
use crate::error::RpcError;
use crate::metrics::prometheus as metrics;

#[derive(Debug, Clone, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RawRpcResponse {
    #[serde(default)]
    result: Option<Box<RawValue>>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone)]
struct CircuitBreaker {
    failures: u32,
    last_failure: Option<Instant>,
    is_open: bool,
    max_failures: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            failures: 0,
            last_failure: None,
            is_open: false,
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        self.last_failure = Some(Instant::now());

        if self.failures >= self.max_failures && !self.is_open {
            self.is_open = true;
            tracing::error!(
                failures = self.failures,
                "daemon circuit breaker tripped, pausing RPC for {}s",
                self.reset_timeout.as_secs()
            );
        }
    }

    fn record_success(&mut self) {
        if self.failures > 0 {
            self.failures = 0;
            tracing::info!("daemon circuit breaker reset after successful call");
        }
    }

    fn check(&mut self) -> Result<(), RpcError> {
        if self.is_open {
            if let Some(last_fail) = self.last_failure {
                if last_fail.elapsed() > self.reset_timeout {
                    tracing::info!("daemon circuit breaker half-open, retrying");
                    self.is_open = false;
                    self.failures = 0;
                } else {
                    return Err(RpcError::CircuitOpen);
                }
            }
        }
        Ok(())
    }
}

pub struct DaemonRpcClient {
    coin: String,
    base_url: String,
    timeout: Duration,
    auth_header: Option<String>,
    client: Client<HttpConnector, Full<Bytes>>,
    circuit_breaker: Arc<RwLock<CircuitBreaker>>,
}

impl DaemonRpcClient {
    pub fn new(coin: &str, cfg: &DaemonConfig) -> Self {
        let path = if cfg.path.is_empty() { "/" } else { cfg.path.as_str() };
        let base_url = format!("http://{}:{}{}", cfg.host, cfg.port, path);

        let auth_header = cfg.user.as_ref().map(|user| {
            let password = cfg.password.as_deref().unwrap_or("");
            format!("Basic {}", BASE64.encode(format!("{}:{}", user, password)))
        });

        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build_http();

        tracing::info!(coin, "daemon RPC client initialized: {}", base_url);

        Self {
            coin: coin.to_string(),
            base_url,
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
            auth_header,
            client,
            circuit_breaker: Arc::new(RwLock::new(CircuitBreaker::new())),
        }
    }

    /// POST a JSON body and return the raw response bytes.
    ///
    /// Non-2xx bodies are still returned when they carry a JSON-RPC error
    /// (bitcoind answers application errors with HTTP 500).
    async fn post(&self, body: Vec<u8>) -> Result<Bytes, RpcError> {
        metrics::inc_rpc_requests(&self.coin);

        let res = self.post_inner(body).await;
        if res.is_err() {
            metrics::inc_rpc_errors(&self.coin);
        }
        res
    }

    async fn post_inner(&self, body: Vec<u8>) -> Result<Bytes, RpcError> {
        self.circuit_breaker.write().await.check()?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(&self.base_url)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = &self.auth_header {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        let req = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let response = match tokio::time::timeout(self.timeout, self.client.request(req)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                self.circuit_breaker.write().await.record_failure();
                return Err(RpcError::Transport(e.to_string()));
            }
            Err(_) => {
                self.circuit_breaker.write().await.record_failure();
                return Err(RpcError::Timeout(self.timeout));
            }
        };

        let status = response.status();
        let bytes = tokio::time::timeout(self.timeout, response.into_body().collect())
            .await
            .map_err(|_| RpcError::Timeout(self.timeout))?
            .map_err(|e| RpcError::Transport(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            if let Ok(RpcResponse { error: Some(error), .. }) = serde_json::from_slice(&bytes) {
                return Err(RpcError::Daemon { code: error.code, message: error.message });
            }
            self.circuit_breaker.write().await.record_failure();
            return Err(RpcError::Http(status.as_u16()));
        }

        self.circuit_breaker.write().await.record_success();
        Ok(bytes)
    }

    fn encode(method: &str, params: &Value) -> Result<Vec<u8>, RpcError> {
        let payload = RpcRequest { jsonrpc: "1.0", id: 1, method, params };
        serde_json::to_vec(&payload).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Make a single RPC call.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let bytes = self.post(Self::encode(method, &params)?).await?;
        let response: RpcResponse =
            serde_json::from_slice(&bytes).map_err(|e| RpcError::Decode(e.to_string()))?;

        if let Some(error) = response.error {
            tracing::warn!(coin = %self.coin, method, code = error.code, "daemon error: {}", error.message);
            return Err(RpcError::Daemon { code: error.code, message: error.message });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Single call returning the literal JSON text of `result`.
    async fn call_raw(&self, method: &str, params: Value) -> Result<Box<RawValue>, RpcError> {
        let bytes = self.post(Self::encode(method, &params)?).await?;
        let response: RawRpcResponse =
            serde_json::from_slice(&bytes).map_err(|e| RpcError::Decode(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(RpcError::Daemon { code: error.code, message: error.message });
        }
        response
            .result
            .ok_or_else(|| RpcError::Decode(format!("{} returned no result", method)))
    }
}

/// Matches batch replies back to request order by `id`; ids missing from the
/// response yield an empty reply.
fn order_batch_replies(count: usize, responses: Vec<RpcResponse>) -> Vec<RpcReply> {
    let mut replies = vec![RpcReply::default(); count];
    for (pos, resp) in responses.into_iter().enumerate() {
        let idx = resp.id.map(|id| id as usize).unwrap_or(pos);
        if let Some(slot) = replies.get_mut(idx) {
            *slot = RpcReply { result: resp.result, error: resp.error };
        }
    }
    replies
}

fn decimal_to_json(amount: &Decimal) -> Result<Value, RpcError> {
    serde_json::Number::from_str(&amount.normalize().to_string())
        .map(Value::Number)
        .map_err(|e| RpcError::Decode(format!("amount {} is not a JSON number: {}", amount, e)))
}

#[async_trait]
impl ChainDaemon for DaemonRpcClient {
    async fn validate_address(&self, address: &str) -> Result<AddressInfo, RpcError> {
        let value = self.call("validateaddress", json!([address])).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
    }

    async fn get_balance(&self) -> Result<Decimal, RpcError> {
        let raw = self.call_raw("getbalance", json!([])).await?;
        parse_decimal(raw.get())
            .ok_or_else(|| RpcError::Decode(format!("getbalance returned non-decimal {}", raw.get())))
    }

    async fn batch(&self, calls: &[RpcCall]) -> Result<Vec<RpcReply>, RpcError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let payload: Vec<RpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(i, c)| RpcRequest {
                jsonrpc: "1.0",
                id: i as u64,
                method: &c.method,
                params: &c.params,
            })
            .collect();
        let body = serde_json::to_vec(&payload).map_err(|e| RpcError::Decode(e.to_string()))?;

        let bytes = self.post(body).await?;
        let responses: Vec<RpcResponse> = serde_json::from_slice(&bytes)
            .map_err(|e| RpcError::Decode(format!("batch response is not an array: {}", e)))?;

        Ok(order_batch_replies(calls.len(), responses))
    }

    async fn send_many(
        &self,
        account: &str,
        amounts: &BTreeMap<String, Decimal>,
    ) -> Result<String, RpcError> {
        let mut outputs = serde_json::Map::new();
        for (address, amount) in amounts {
            outputs.insert(address.clone(), decimal_to_json(amount)?);
        }

        let result = self.call("sendmany", json!([account, outputs])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Decode(format!("sendmany returned no txid: {}", result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn daemon_config() -> DaemonConfig {
        DaemonConfig {
            host: "127.0.0.1".to_string(),
            port: 8332,
            user: Some("rpcuser".to_string()),
            password: Some("rpcpass".to_string()),
            path: "/".to_string(),
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_circuit_breaker() {
        let mut breaker = CircuitBreaker::new();
        assert!(!breaker.is_open);

        for _ in 0..4 {
            breaker.record_failure();
            assert!(!breaker.is_open);
        }

        breaker.record_failure();
        assert!(breaker.is_open);
        assert!(matches!(breaker.check(), Err(RpcError::CircuitOpen)));
    }

    #[test]
    fn test_circuit_breaker_success_clears_failures() {
        let mut breaker = CircuitBreaker::new();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failures, 0);
        assert!(breaker.check().is_ok());
    }

    #[tokio::test]
    async fn test_rpc_client_creation() {
        let client = DaemonRpcClient::new("TST", &daemon_config());
        assert_eq!(client.base_url, "http://127.0.0.1:8332/");
        assert_eq!(client.auth_header.as_deref(), Some("Basic cnBjdXNlcjpycGNwYXNz"));
        assert_eq!(client.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_batch_replies_follow_request_order() {
        let body = r#"[
            {"id": 1, "result": "acct", "error": null},
            {"id": 0, "result": null, "error": {"code": -5, "message": "Invalid or non-wallet transaction id"}}
        ]"#;
        let responses: Vec<RpcResponse> = serde_json::from_str(body).unwrap();
        let replies = order_batch_replies(3, responses);

        assert_eq!(replies[0].error.as_ref().map(|e| e.code), Some(-5));
        assert_eq!(replies[1].value(), Some(&json!("acct")));
        assert_eq!(replies[2], RpcReply::default());
    }

    #[test]
    fn test_raw_balance_keeps_scale() {
        let body = br#"{"result": 12.50000000, "error": null, "id": 1}"#;
        let response: RawRpcResponse = serde_json::from_slice(body).unwrap();
        let balance = parse_decimal(response.result.unwrap().get()).unwrap();
        assert_eq!(balance, dec!(12.5));
        assert_eq!(balance.scale(), 8);
    }

    #[test]
    fn test_amounts_encode_as_json_numbers() {
        assert_eq!(decimal_to_json(&dec!(0.37500000)).unwrap(), json!(0.375));
        assert_eq!(decimal_to_json(&dec!(12)).unwrap(), json!(12));
    }
}
