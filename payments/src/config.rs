use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Rounds considered per cycle unless the pool overrides it.
pub const DEFAULT_MAX_ROUNDS_PER_CYCLE: usize = 500;
pub const DEFAULT_WITHHOLD_STEP: Decimal = dec!(0.01);
pub const DEFAULT_PAYMENT_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_MINIMUM_PAYMENT: Decimal = dec!(0.1);

#[derive(Deserialize, Clone, Debug)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_rpc_path")]
    pub path: String,
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_rpc_path() -> String { "/".to_string() }

#[derive(Deserialize, Clone, Debug)]
pub struct PoolConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Pool wallet address; must be owned by the daemon's wallet.
    pub address: String,
    #[serde(default)]
    pub payment_interval_secs: u64,
    /// Minimum payout in display units.
    #[serde(default)]
    pub minimum_payment: Decimal,
    /// Withhold increase per insufficient-funds retry.
    #[serde(default)]
    pub withhold_step: Decimal,
    #[serde(default)]
    pub max_rounds_per_cycle: usize,
    /// Overrides the process-wide Redis URL for this pool.
    #[serde(default)]
    pub redis_url: Option<String>,
    pub daemon: DaemonConfig,
}

fn default_enabled() -> bool { true }

impl PoolConfig {
    pub fn redis_url<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.redis_url.as_deref().unwrap_or(fallback)
    }

    fn normalize(&mut self) {
        if self.payment_interval_secs == 0 {
            self.payment_interval_secs = DEFAULT_PAYMENT_INTERVAL_SECS;
        }
        if self.minimum_payment <= Decimal::ZERO {
            self.minimum_payment = DEFAULT_MINIMUM_PAYMENT;
        }
        if self.withhold_step <= Decimal::ZERO || self.withhold_step > Decimal::ONE {
            self.withhold_step = DEFAULT_WITHHOLD_STEP;
        }
        if self.max_rounds_per_cycle == 0 {
            self.max_rounds_per_cycle = DEFAULT_MAX_ROUNDS_PER_CYCLE;
        }
        if self.daemon.timeout_secs == 0 {
            self.daemon.timeout_secs = 30;
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct PaymentsConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_metrics_listen")]
    pub metrics_listen: String,
    /// Where payment outboxes and recovery artifacts are written.
    #[serde(default = "default_recovery_dir")]
    pub recovery_dir: PathBuf,
    #[serde(default)]
    pub store_timeout_secs: u64,
    /// Keyed by coin name (the Redis key namespace).
    #[serde(default)]
    pub pools: BTreeMap<String, PoolConfig>,
}

fn default_redis_url() -> String { "redis://127.0.0.1/".to_string() }
fn default_metrics_listen() -> String { "0.0.0.0:9101".to_string() }
fn default_recovery_dir() -> PathBuf { PathBuf::from(".") }

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            metrics_listen: default_metrics_listen(),
            recovery_dir: default_recovery_dir(),
            store_timeout_secs: 10,
            pools: BTreeMap::new(),
        }
    }
}

impl PaymentsConfig {
    /// Load `payments_config.json` (or `$ZION_PAYMENTS_CONFIG`), then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("ZION_PAYMENTS_CONFIG")
            .unwrap_or_else(|_| "payments_config.json".to_string());

        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(txt) => Self::from_json(&txt).with_context(|| format!("invalid config file {}", path))?,
            Err(e) => {
                tracing::warn!("no payments config at {} ({}), no pools will be processed", path, e);
                Self::default()
            }
        };

        if let Ok(r) = std::env::var("ZION_REDIS_URL") {
            cfg.redis_url = r;
        } else if let Ok(r) = std::env::var("REDIS_URL") {
            // legacy
            cfg.redis_url = r;
        }
        if let Ok(m) = std::env::var("ZION_PAYMENTS_METRICS") { cfg.metrics_listen = m; }
        if let Ok(d) = std::env::var("ZION_RECOVERY_DIR") { cfg.recovery_dir = PathBuf::from(d); }
        if let Ok(t) = std::env::var("ZION_STORE_TIMEOUT") { cfg.store_timeout_secs = t.parse().unwrap_or(10); }

        cfg.normalize();
        Ok(cfg)
    }

    pub fn from_json(txt: &str) -> Result<Self> {
        let mut cfg: Self = serde_json::from_str(txt)?;
        cfg.normalize();
        Ok(cfg)
    }

    fn normalize(&mut self) {
        if self.store_timeout_secs == 0 {
            self.store_timeout_secs = 10;
        }
        for pool in self.pools.values_mut() {
            pool.normalize();
        }
    }

    /// Pools with payment processing switched on.
    pub fn enabled_pools(&self) -> impl Iterator<Item = (&String, &PoolConfig)> {
        self.pools.iter().filter(|(_, p)| p.enabled)
    }
}
