/// Redis Ledger Store - balances, pending blocks and round shares for one coin
///
/// Every trait method is a single `MULTI ... EXEC` pipeline on a lazily created
/// `redis::aio::ConnectionManager`, bounded by a per-call timeout.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{CoinKeys, LedgerStore, PendingSnapshot, StoreBatch, StoreOp};
use crate::error::StoreError;
use crate::metrics::prometheus as metrics;

pub struct RedisStore {
    coin: String,
    client: redis::Client,
    connection: Arc<RwLock<Option<redis::aio::ConnectionManager>>>,
    timeout: Duration,
}

impl RedisStore {
    pub fn new(coin: &str, redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Backend(format!("failed to create Redis client: {}", e)))?;

        Ok(Self {
            coin: coin.to_string(),
            client,
            connection: Arc::new(RwLock::new(None)),
            timeout,
        })
    }

    /// Get async connection (lazy initialization)
    async fn get_connection(&self) -> Result<redis::aio::ConnectionManager, StoreError> {
        let mut conn_guard = self.connection.write().await;

        if let Some(conn) = conn_guard.as_ref() {
            return Ok(conn.clone());
        }

        let manager = self.bounded(self.client.get_connection_manager()).await?;
        *conn_guard = Some(manager.clone());
        Ok(manager)
    }

    /// Runs a Redis future under the store timeout, counting failures.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let res = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(StoreError::from(e)),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };
        if let Err(e) = &res {
            metrics::inc_store_errors(&self.coin);
            tracing::warn!(coin = %self.coin, "redis call failed: {}", e);
        }
        res
    }

    /// Health check
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let pong: String = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;

        if pong != "PONG" {
            return Err(StoreError::Decode(format!("Redis health check failed: got {}", pong)));
        }
        Ok(())
    }
}

fn build_pipeline(batch: &StoreBatch) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for op in batch.ops() {
        match op {
            StoreOp::SMove { from, to, member } => {
                pipe.smove(from, to, member).ignore();
            }
            StoreOp::HIncrByFloat { key, field, delta } => {
                pipe.cmd("HINCRBYFLOAT")
                    .arg(key)
                    .arg(field)
                    .arg(delta.normalize().to_string())
                    .ignore();
            }
            StoreOp::Del { keys } => {
                pipe.del(keys).ignore();
            }
        }
    }
    pipe
}

#[async_trait]
impl LedgerStore for RedisStore {
    async fn load_pending(&self, keys: &CoinKeys) -> Result<PendingSnapshot, StoreError> {
        let mut conn = self.get_connection().await?;
        let (balances, pending): (HashMap<String, String>, Vec<String>) = self
            .bounded(
                redis::pipe()
                    .atomic()
                    .hgetall(keys.balances())
                    .smembers(keys.blocks_pending())
                    .query_async(&mut conn),
            )
            .await?;

        Ok(PendingSnapshot { balances, pending })
    }

    async fn fetch_hashes(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.hgetall(key);
        }

        let mut conn = self.get_connection().await?;
        let maps: Vec<HashMap<String, String>> = self.bounded(pipe.query_async(&mut conn)).await?;
        if maps.len() != keys.len() {
            return Err(StoreError::Decode(format!(
                "expected {} hashes, got {}",
                keys.len(),
                maps.len()
            )));
        }
        Ok(maps)
    }

    async fn execute(&self, batch: &StoreBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let pipe = build_pipeline(batch);
        let mut conn = self.get_connection().await?;
        self.bounded(pipe.query_async::<_, ()>(&mut conn)).await
    }
}
