//! Scripted `ChainDaemon` for driving the payment pipeline in tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::daemon::{AddressInfo, ChainDaemon, RpcCall, RpcReply};
use crate::error::{RpcError, RPC_INVALID_ADDRESS_OR_KEY, RPC_WALLET_INSUFFICIENT_FUNDS};

pub struct ScriptedDaemon {
    isvalid: bool,
    ismine: bool,
    balance: Decimal,
    account: Value,
    transactions: Mutex<HashMap<String, RpcReply>>,
    batch_error: Option<RpcError>,
    batch_delay: Duration,
    batches_in_flight: AtomicUsize,
    peak_batches_in_flight: AtomicUsize,
    /// Short replies drop this many trailing entries.
    truncate_batch: usize,
    send_results: Mutex<VecDeque<Result<String, RpcError>>>,
    sent: Mutex<Vec<(String, BTreeMap<String, Decimal>)>>,
}

impl ScriptedDaemon {
    pub fn new() -> Self {
        Self {
            isvalid: true,
            ismine: true,
            balance: dec!(100.00000000),
            account: json!(""),
            transactions: Mutex::new(HashMap::new()),
            batch_error: None,
            batch_delay: Duration::ZERO,
            batches_in_flight: AtomicUsize::new(0),
            peak_batches_in_flight: AtomicUsize::new(0),
            truncate_batch: 0,
            send_results: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_invalid_address(mut self) -> Self {
        self.isvalid = false;
        self.ismine = false;
        self
    }

    pub fn with_ismine(mut self, ismine: bool) -> Self {
        self.ismine = ismine;
        self
    }

    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_account(mut self, account: Value) -> Self {
        self.account = account;
        self
    }

    /// Confirmed coinbase paying `amount` to `address`.
    pub fn with_generate(self, tx: &str, address: &str, amount: Decimal) -> Self {
        self.set_generate(tx, address, amount);
        self
    }

    pub fn with_orphan(self, tx: &str, address: &str) -> Self {
        self.with_details(tx, json!([{ "address": address, "category": "orphan", "amount": 0 }]))
    }

    pub fn with_immature(self, tx: &str, address: &str) -> Self {
        self.with_details(tx, json!([{ "address": address, "category": "immature", "amount": 1 }]))
    }

    pub fn with_details(self, tx: &str, details: Value) -> Self {
        self.set_details(tx, details);
        self
    }

    pub fn with_reply(self, tx: &str, reply: RpcReply) -> Self {
        self.set_reply(tx, reply);
        self
    }

    /// Changes the `gettransaction` reply between cycles.
    pub fn set_reply(&self, tx: &str, reply: RpcReply) {
        self.transactions.lock().unwrap().insert(tx.to_string(), reply);
    }

    pub fn set_generate(&self, tx: &str, address: &str, amount: Decimal) {
        let amount: f64 = amount.to_string().parse().unwrap();
        self.set_details(tx, json!([{ "address": address, "category": "generate", "amount": amount }]));
    }

    pub fn set_details(&self, tx: &str, details: Value) {
        self.set_reply(tx, RpcReply::ok(json!({ "txid": tx, "details": details })));
    }

    /// Every batch call sleeps this long before answering.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Most batch calls ever answered concurrently.
    pub fn peak_batches_in_flight(&self) -> usize {
        self.peak_batches_in_flight.load(Ordering::SeqCst)
    }

    pub fn with_batch_error(mut self, err: RpcError) -> Self {
        self.batch_error = Some(err);
        self
    }

    pub fn with_truncated_batch(mut self, missing: usize) -> Self {
        self.truncate_batch = missing;
        self
    }

    /// Queues a `sendmany` outcome; once the queue is empty every send succeeds.
    pub fn queue_send(self, result: Result<String, RpcError>) -> Self {
        self.send_results.lock().unwrap().push_back(result);
        self
    }

    pub fn queue_insufficient_funds(self, times: usize) -> Self {
        (0..times).fold(self, |d, _| {
            d.queue_send(Err(RpcError::Daemon {
                code: RPC_WALLET_INSUFFICIENT_FUNDS,
                message: "Insufficient funds".into(),
            }))
        })
    }

    /// Every `sendmany` call received, in order.
    pub fn sent(&self) -> Vec<(String, BTreeMap<String, Decimal>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainDaemon for ScriptedDaemon {
    async fn validate_address(&self, _address: &str) -> Result<AddressInfo, RpcError> {
        Ok(AddressInfo { isvalid: self.isvalid, ismine: self.ismine })
    }

    async fn get_balance(&self) -> Result<Decimal, RpcError> {
        Ok(self.balance)
    }

    async fn batch(&self, calls: &[RpcCall]) -> Result<Vec<RpcReply>, RpcError> {
        if let Some(err) = &self.batch_error {
            return Err(err.clone());
        }

        if !self.batch_delay.is_zero() {
            let now = self.batches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_batches_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.batch_delay).await;
            self.batches_in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        let transactions = self.transactions.lock().unwrap();
        let mut replies: Vec<RpcReply> = calls
            .iter()
            .map(|call| match call.method.as_str() {
                "gettransaction" => {
                    let tx = call.params.get(0).and_then(Value::as_str).unwrap_or_default();
                    transactions.get(tx).cloned().unwrap_or_else(|| {
                        RpcReply::err(RPC_INVALID_ADDRESS_OR_KEY, "Invalid or non-wallet transaction id")
                    })
                }
                "getaccount" => RpcReply::ok(self.account.clone()),
                other => RpcReply::err(-32601, &format!("Method not found: {}", other)),
            })
            .collect();
        replies.truncate(replies.len().saturating_sub(self.truncate_batch));
        Ok(replies)
    }

    async fn send_many(
        &self,
        account: &str,
        amounts: &BTreeMap<String, Decimal>,
    ) -> Result<String, RpcError> {
        self.sent.lock().unwrap().push((account.to_string(), amounts.clone()));
        self.send_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("txid-paid".to_string()))
    }
}
