/// Reward allocation from round shares.
///
/// Confirmed rounds split their reward pro rata over `{coin}:shares:round{height}`.
/// Orphaned and kicked rounds keep their share map so the sweeper can move it
/// back into the current round.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

use super::context::PoolContext;
use super::round::{Round, RoundCategory};
use super::worker::{worker_entry, Workers};
use crate::blockchain::daemon::parse_decimal;
use crate::error::CycleError;
use crate::store::LedgerStore;

pub async fn allocate(
    ctx: &PoolContext,
    store: &dyn LedgerStore,
    rounds: &mut [Round],
    workers: &mut Workers,
) -> Result<(), CycleError> {
    if rounds.is_empty() {
        return Ok(());
    }

    let keys: Vec<String> = rounds.iter().map(|r| ctx.keys.round_shares(r.height())).collect();
    let maps = store.fetch_hashes(&keys).await.map_err(CycleError::ShareLookup)?;

    for (round, raw) in rounds.iter_mut().zip(&maps) {
        let shares = parse_shares(&ctx.coin, raw);

        match round.category {
            RoundCategory::Generate => {
                let Some(reward) = round.reward else { continue };
                let Some(reward_units) = ctx.floor_units(reward) else {
                    tracing::error!(coin = %ctx.coin, "reward {} of round {} out of range", reward, round.serialized);
                    continue;
                };
                if shares.is_empty() {
                    tracing::error!(
                        coin = %ctx.coin,
                        "No worker shares for confirmed round {}, reward stays in the wallet",
                        round.serialized
                    );
                    continue;
                }
                for (worker, units) in split_reward(reward_units, &shares) {
                    worker_entry(workers, &worker).reward_units += units;
                }
            }
            RoundCategory::Orphan | RoundCategory::Kicked => {
                if shares.is_empty() {
                    tracing::warn!(coin = %ctx.coin, "No worker shares for {} round {}", round.category.as_str(), round.serialized);
                } else {
                    round.worker_shares = Some(shares);
                }
            }
            RoundCategory::Pending => {}
        }
    }

    Ok(())
}

/// Parses a shares hash; non-numeric or non-positive entries are dropped.
pub fn parse_shares(coin: &str, raw: &HashMap<String, String>) -> BTreeMap<String, Decimal> {
    raw.iter()
        .filter_map(|(worker, value)| match parse_decimal(value) {
            Some(shares) if shares > Decimal::ZERO => Some((worker.clone(), shares)),
            _ => {
                tracing::warn!(coin = %coin, "ignoring share entry {}={:?}", worker, value);
                None
            }
        })
        .collect()
}

/// `floor(reward_units * shares / total)` per worker; the sum never exceeds
/// `reward_units`. The remainder stays in the pool wallet.
pub fn split_reward(reward_units: u64, shares: &BTreeMap<String, Decimal>) -> BTreeMap<String, u64> {
    let total: Decimal = shares.values().copied().sum();
    if total <= Decimal::ZERO {
        return BTreeMap::new();
    }

    let reward = Decimal::from(reward_units);
    shares
        .iter()
        .map(|(worker, share)| {
            let units = match reward.checked_mul(*share) {
                Some(product) => product / total,
                None => reward * (*share / total),
            };
            (worker.clone(), units.floor().to_u64().unwrap_or(0).min(reward_units))
        })
        .collect()
}
