//! In-process `LedgerStore` with Redis semantics for the commands the
//! pipeline uses, plus failure injection for the atomic batch.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{CoinKeys, LedgerStore, PendingSnapshot, StoreBatch, StoreOp};
use crate::error::StoreError;

#[derive(Default)]
struct Data {
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
    executed: Mutex<Vec<StoreBatch>>,
    fail_loads: AtomicBool,
    /// Number of `execute` calls that succeed before every later one fails.
    fail_execute_after: Mutex<Option<usize>>,
    execute_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset(&self, key: &str, field: &str, value: &str) {
        let mut data = self.data.lock().unwrap();
        data.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    pub fn sadd(&self, key: &str, member: &str) {
        let mut data = self.data.lock().unwrap();
        data.sets.entry(key.to_string()).or_default().insert(member.to_string());
    }

    pub fn hgetall(&self, key: &str) -> HashMap<String, String> {
        self.data.lock().unwrap().hashes.get(key).cloned().unwrap_or_default()
    }

    pub fn hget_decimal(&self, key: &str, field: &str) -> Option<Decimal> {
        self.hgetall(key).get(field).and_then(|v| v.parse().ok())
    }

    pub fn smembers(&self, key: &str) -> BTreeSet<String> {
        self.data.lock().unwrap().sets.get(key).cloned().unwrap_or_default()
    }

    pub fn exists(&self, key: &str) -> bool {
        let data = self.data.lock().unwrap();
        data.hashes.get(key).map_or(false, |h| !h.is_empty())
            || data.sets.get(key).map_or(false, |s| !s.is_empty())
    }

    pub fn executed(&self) -> Vec<StoreBatch> {
        self.executed.lock().unwrap().clone()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_execute_after(&self, successes: usize) {
        *self.fail_execute_after.lock().unwrap() = Some(successes);
    }

    fn apply(data: &mut Data, op: &StoreOp) {
        match op {
            StoreOp::SMove { from, to, member } => {
                let moved = data.sets.get_mut(from).map_or(false, |s| s.remove(member));
                if moved {
                    data.sets.entry(to.clone()).or_default().insert(member.clone());
                }
            }
            StoreOp::HIncrByFloat { key, field, delta } => {
                let hash = data.hashes.entry(key.clone()).or_default();
                let current = hash
                    .get(field)
                    .and_then(|v| v.parse::<Decimal>().ok())
                    .unwrap_or(Decimal::ZERO);
                hash.insert(field.clone(), (current + delta).normalize().to_string());
            }
            StoreOp::Del { keys } => {
                for key in keys {
                    data.hashes.remove(key);
                    data.sets.remove(key);
                }
            }
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load_pending(&self, keys: &CoinKeys) -> Result<PendingSnapshot, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection refused".into()));
        }
        Ok(PendingSnapshot {
            balances: self.hgetall(&keys.balances()),
            pending: self.smembers(&keys.blocks_pending()).into_iter().collect(),
        })
    }

    async fn fetch_hashes(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>, StoreError> {
        Ok(keys.iter().map(|k| self.hgetall(k)).collect())
    }

    async fn execute(&self, batch: &StoreBatch) -> Result<(), StoreError> {
        let call = self.execute_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.fail_execute_after.lock().unwrap() {
            if call >= limit {
                return Err(StoreError::Backend("EXECABORT Transaction discarded".into()));
            }
        }

        let mut data = self.data.lock().unwrap();
        for op in batch.ops() {
            Self::apply(&mut data, op);
        }
        self.executed.lock().unwrap().push(batch.clone());
        Ok(())
    }
}
