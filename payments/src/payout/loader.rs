/// Cycle input: stored worker balances and the pending-round backlog.

use std::collections::HashMap;

use super::context::PoolContext;
use super::round::Round;
use super::worker::{WorkerAccount, Workers};
use crate::blockchain::daemon::parse_decimal;
use crate::error::CycleError;
use crate::store::LedgerStore;

#[derive(Debug, Default)]
pub struct LoadedRounds {
    pub workers: Workers,
    pub rounds: Vec<Round>,
    /// Pending rounds left for a later cycle by the per-cycle cap.
    pub deferred: usize,
}

pub async fn load(ctx: &PoolContext, store: &dyn LedgerStore) -> Result<LoadedRounds, CycleError> {
    let snapshot = store.load_pending(&ctx.keys).await.map_err(CycleError::Load)?;

    let workers = parse_balances(ctx, &snapshot.balances)?;
    let (rounds, deferred) = select_rounds(&ctx.coin, snapshot.pending, ctx.max_rounds_per_cycle);

    if deferred > 0 {
        tracing::info!(
            coin = %ctx.coin,
            "{} pending rounds, processing {} this cycle and deferring {}",
            rounds.len() + deferred,
            rounds.len(),
            deferred
        );
    }

    Ok(LoadedRounds { workers, rounds, deferred })
}

/// Stored balances are display-unit decimals; anything unparseable aborts the
/// cycle rather than silently zeroing a worker.
pub fn parse_balances(
    ctx: &PoolContext,
    balances: &HashMap<String, String>,
) -> Result<Workers, CycleError> {
    let mut workers = Workers::new();
    for (worker, raw) in balances {
        let units = parse_decimal(raw)
            .and_then(|amount| ctx.to_units(amount))
            .ok_or_else(|| CycleError::InvalidBalance {
                worker: worker.clone(),
                value: raw.clone(),
            })?;
        workers.insert(worker.clone(), WorkerAccount::with_balance(worker, units));
    }
    Ok(workers)
}

/// Decodes pending tokens and keeps the oldest `cap` rounds. Rounds sharing the
/// boundary height are kept together so sibling checks see the whole height.
pub fn select_rounds(coin: &str, tokens: Vec<String>, cap: usize) -> (Vec<Round>, usize) {
    let mut rounds: Vec<Round> = tokens
        .iter()
        .filter_map(|token| match Round::parse(token) {
            Ok(round) => Some(round),
            Err(e) => {
                tracing::warn!(coin = %coin, "skipping pending entry: {}", e);
                None
            }
        })
        .collect();

    rounds.sort_by(|a, b| {
        a.height()
            .cmp(&b.height())
            .then_with(|| a.serialized.cmp(&b.serialized))
    });

    if rounds.len() <= cap || cap == 0 {
        return (rounds, 0);
    }

    let boundary = rounds[cap - 1].height();
    let keep = cap + rounds[cap..].iter().take_while(|r| r.height() == boundary).count();
    let deferred = rounds.len() - keep;
    rounds.truncate(keep);
    (rounds, deferred)
}
