/// Retiring rounds out of the pending set.
///
/// `terminal_ops` is the store mutation for one round's final state. The sweeper
/// applies it to orphaned and kicked rounds in their own transaction before any
/// payment is attempted; confirmed rounds are retired later, inside the commit.

use super::round::{Round, RoundCategory};
use crate::store::{CoinKeys, StoreBatch, StoreOp};

pub fn terminal_ops(keys: &CoinKeys, round: &Round) -> StoreBatch {
    let mut batch = StoreBatch::new();
    let target = match round.category {
        RoundCategory::Generate => keys.blocks_confirmed(),
        RoundCategory::Orphan => keys.blocks_orphaned(),
        RoundCategory::Kicked => keys.blocks_kicked(),
        RoundCategory::Pending => return batch,
    };
    batch.push(StoreOp::SMove {
        from: keys.blocks_pending(),
        to: target,
        member: round.serialized.clone(),
    });

    let delete_shares = match round.category {
        RoundCategory::Generate => true,
        _ => round.can_delete_shares,
    };
    if !delete_shares {
        return batch;
    }

    // Work on a lost block counts toward the round in progress.
    if round.category != RoundCategory::Generate {
        for (worker, shares) in round.worker_shares.iter().flatten() {
            batch.push(StoreOp::HIncrByFloat {
                key: keys.round_current(),
                field: worker.clone(),
                delta: *shares,
            });
        }
    }
    batch.push(StoreOp::Del { keys: vec![keys.round_shares(round.height())] });
    batch
}

/// Splits classified rounds into the sweep transaction (orphaned / kicked) and
/// the confirmed rounds that stay in the cycle.
pub fn sweep(keys: &CoinKeys, rounds: Vec<Round>) -> (StoreBatch, Vec<Round>) {
    let (confirmed, retired): (Vec<Round>, Vec<Round>) = rounds
        .into_iter()
        .partition(|r| r.category == RoundCategory::Generate);

    let mut batch = StoreBatch::new();
    for round in &retired {
        batch.append(terminal_ops(keys, round));
    }
    (batch, confirmed)
}
