/// Per-pool payment context and pool setup.
///
/// `setup_pool` checks that the daemon's wallet owns the pool address and probes
/// the coin's precision from the textual scale of `getbalance`. Every amount
/// inside a cycle is then handled in smallest units (`display * magnitude`).

use anyhow::{anyhow, bail, Context, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::time::Duration;

use super::recovery::RecoveryJournal;
use crate::blockchain::ChainDaemon;
use crate::config::PoolConfig;
use crate::store::CoinKeys;

/// Largest supported scale; keeps `reward_units * shares` well inside `Decimal` range.
const MAX_DECIMALS: u32 = 18;

#[derive(Debug, Clone)]
pub struct PoolContext {
    pub coin: String,
    pub keys: CoinKeys,
    /// Pool wallet address; the generation detail is matched against it.
    pub address: String,
    pub decimals: u32,
    /// `10^decimals` smallest units per display unit.
    pub magnitude: u64,
    pub min_payment_units: u64,
    pub withhold_step: Decimal,
    pub max_rounds_per_cycle: usize,
    pub payment_interval: Duration,
}

impl PoolContext {
    pub fn new(coin: &str, cfg: &PoolConfig, decimals: u32) -> Result<Self> {
        if decimals > MAX_DECIMALS {
            bail!("{} decimal places is more than supported ({})", decimals, MAX_DECIMALS);
        }
        let magnitude = 10u64.pow(decimals);

        let mut ctx = Self {
            coin: coin.to_string(),
            keys: CoinKeys::new(coin),
            address: cfg.address.clone(),
            decimals,
            magnitude,
            min_payment_units: 0,
            withhold_step: cfg.withhold_step,
            max_rounds_per_cycle: cfg.max_rounds_per_cycle.max(1),
            payment_interval: Duration::from_secs(cfg.payment_interval_secs.max(1)),
        };
        ctx.min_payment_units = ctx
            .floor_units(cfg.minimum_payment)
            .ok_or_else(|| anyhow!("minimum payment {} out of range", cfg.minimum_payment))?;
        Ok(ctx)
    }

    fn magnitude_decimal(&self) -> Decimal {
        Decimal::from(self.magnitude)
    }

    /// Display amount to smallest units, rounded to nearest. `None` for negative
    /// or out-of-range values.
    pub fn to_units(&self, amount: Decimal) -> Option<u64> {
        amount
            .checked_mul(self.magnitude_decimal())?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u64()
    }

    /// Display amount to smallest units, rounded down. Used for block rewards
    /// so credited units never exceed what the coinbase holds.
    pub fn floor_units(&self, amount: Decimal) -> Option<u64> {
        amount.checked_mul(self.magnitude_decimal())?.floor().to_u64()
    }

    /// Smallest units to an exact display amount with `decimals` places.
    pub fn to_display(&self, units: u64) -> Decimal {
        Decimal::from_i128_with_scale(i128::from(units), self.decimals)
    }

    pub fn to_display_signed(&self, units: i128) -> Decimal {
        Decimal::from_i128_with_scale(units, self.decimals)
    }
}

/// Decimal places of the daemon's `getbalance` literal. A scale of zero means the
/// daemon did not report fractional digits and precision can't be derived.
pub fn probe_precision(balance: Decimal) -> Result<u32> {
    match balance.scale() {
        0 => bail!("could not determine coin precision from getbalance reply {}", balance),
        scale => Ok(scale),
    }
}

/// Validates a pool against its daemon and builds its context. A pool that fails
/// here takes no part in payment processing.
pub async fn setup_pool(
    coin: &str,
    cfg: &PoolConfig,
    daemon: &dyn ChainDaemon,
    journal: &RecoveryJournal,
) -> Result<PoolContext> {
    if journal.has_outbox() {
        bail!(
            "unfinished payment journal at {}; reconcile it against the wallet and remove it before re-enabling payments",
            journal.outbox_path().display()
        );
    }

    let (address, balance) = tokio::join!(daemon.validate_address(&cfg.address), daemon.get_balance());

    let address = address.context("Error with payment processing daemon (validateaddress)")?;
    if !address.isvalid {
        bail!("daemon reports pool address {} as invalid - payment processing disabled", cfg.address);
    }
    if !address.ismine {
        bail!("daemon does not own pool address {} - payment processing disabled", cfg.address);
    }

    let balance = balance.context("Error with payment processing daemon (getbalance)")?;
    let decimals = probe_precision(balance)?;

    let ctx = PoolContext::new(coin, cfg, decimals)?;
    tracing::debug!(
        coin = %coin,
        "pool setup: magnitude {} min payment {} units",
        ctx.magnitude,
        ctx.min_payment_units
    );
    Ok(ctx)
}

#[cfg(test)]
pub fn test_context(decimals: u32, min_payment: Decimal) -> PoolContext {
    let cfg: PoolConfig = serde_json::from_value(serde_json::json!({
        "address": "poolAddr",
        "payment_interval_secs": 600,
        "minimum_payment": min_payment.to_string(),
        "withhold_step": "0.01",
        "max_rounds_per_cycle": 500,
        "daemon": { "host": "127.0.0.1", "port": 1 }
    }))
    .unwrap();
    PoolContext::new("TST", &cfg, decimals).unwrap()
}
