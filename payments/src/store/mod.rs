//! Ledger store seam.
//!
//! Per-coin key layout, the mutation vocabulary the pipeline emits, and the
//! `LedgerStore` trait every backend implements. Each method is one atomic
//! round trip (`MULTI ... EXEC` on Redis).

pub mod redis_store;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::StoreError;

pub use redis_store::RedisStore;

/// Key names for one coin namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinKeys {
    coin: String,
}

impl CoinKeys {
    pub fn new(coin: &str) -> Self {
        Self { coin: coin.to_string() }
    }

    pub fn coin(&self) -> &str {
        &self.coin
    }

    pub fn balances(&self) -> String {
        format!("{}:balances", self.coin)
    }

    pub fn payouts(&self) -> String {
        format!("{}:payouts", self.coin)
    }

    pub fn stats(&self) -> String {
        format!("{}:stats", self.coin)
    }

    pub fn blocks_pending(&self) -> String {
        format!("{}:blocksPending", self.coin)
    }

    pub fn blocks_kicked(&self) -> String {
        format!("{}:blocksKicked", self.coin)
    }

    pub fn blocks_orphaned(&self) -> String {
        format!("{}:blocksOrphaned", self.coin)
    }

    pub fn blocks_confirmed(&self) -> String {
        format!("{}:blocksConfirmed", self.coin)
    }

    pub fn round_shares(&self, height: u64) -> String {
        format!("{}:shares:round{}", self.coin, height)
    }

    pub fn round_current(&self) -> String {
        format!("{}:shares:roundCurrent", self.coin)
    }
}

/// One mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreOp {
    SMove { from: String, to: String, member: String },
    HIncrByFloat { key: String, field: String, delta: Decimal },
    Del { keys: Vec<String> },
}

impl StoreOp {
    /// The equivalent redis-cli command, used for recovery artifacts.
    pub fn to_command(&self) -> Vec<String> {
        match self {
            StoreOp::SMove { from, to, member } => {
                vec!["SMOVE".into(), from.clone(), to.clone(), member.clone()]
            }
            StoreOp::HIncrByFloat { key, field, delta } => vec![
                "HINCRBYFLOAT".into(),
                key.clone(),
                field.clone(),
                delta.normalize().to_string(),
            ],
            StoreOp::Del { keys } => {
                let mut cmd = vec!["DEL".to_string()];
                cmd.extend(keys.iter().cloned());
                cmd
            }
        }
    }
}

/// Ordered list of mutations applied as a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreBatch {
    ops: Vec<StoreOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: StoreOp) {
        self.ops.push(op);
    }

    pub fn append(&mut self, other: StoreBatch) {
        self.ops.extend(other.ops);
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.ops.iter().map(StoreOp::to_command).collect()
    }
}

/// Balances hash and pending-block set, read together.
#[derive(Debug, Clone, Default)]
pub struct PendingSnapshot {
    pub balances: HashMap<String, String>,
    pub pending: Vec<String>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// `HGETALL {coin}:balances` + `SMEMBERS {coin}:blocksPending`, atomically.
    async fn load_pending(&self, keys: &CoinKeys) -> Result<PendingSnapshot, StoreError>;

    /// `HGETALL` for every key, atomically; one map per key, in key order.
    async fn fetch_hashes(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>, StoreError>;

    /// Apply every op of the batch in one transaction.
    async fn execute(&self, batch: &StoreBatch) -> Result<(), StoreError>;
}
