/// Final ledger commit for a cycle.
///
/// One transaction retires the confirmed rounds, applies every worker's balance
/// change, records what was paid and bumps `totalPaid`. If it fails after money
/// left the wallet, the pool is disabled and the commands are written out for
/// manual replay.

use rust_decimal::Decimal;

use super::context::PoolContext;
use super::cycle::CycleController;
use super::recovery::RecoveryJournal;
use super::round::Round;
use super::sweeper::terminal_ops;
use super::worker::Workers;
use crate::error::CycleError;
use crate::store::{LedgerStore, StoreBatch, StoreOp};

pub fn build_commit(ctx: &PoolContext, confirmed: &[Round], workers: &Workers) -> StoreBatch {
    let mut batch = StoreBatch::new();
    for round in confirmed {
        batch.append(terminal_ops(&ctx.keys, round));
    }

    let mut total_paid_units: u64 = 0;
    for (key, worker) in workers {
        if worker.balance_change_units != 0 {
            batch.push(StoreOp::HIncrByFloat {
                key: ctx.keys.balances(),
                field: key.clone(),
                delta: ctx.to_display_signed(worker.balance_change_units),
            });
        }
        if worker.sent_units != 0 {
            batch.push(StoreOp::HIncrByFloat {
                key: ctx.keys.payouts(),
                field: key.clone(),
                delta: worker.sent,
            });
            total_paid_units += worker.sent_units;
        }
    }

    if total_paid_units != 0 {
        batch.push(StoreOp::HIncrByFloat {
            key: ctx.keys.stats(),
            field: "totalPaid".to_string(),
            delta: ctx.to_display(total_paid_units),
        });
    }
    batch
}

/// Display-unit total recorded in `totalPaid` by this batch.
pub fn total_paid(ctx: &PoolContext, batch: &StoreBatch) -> Decimal {
    let stats = ctx.keys.stats();
    batch
        .ops()
        .iter()
        .filter_map(|op| match op {
            StoreOp::HIncrByFloat { key, delta, .. } if *key == stats => Some(*delta),
            _ => None,
        })
        .sum()
}

pub async fn commit(
    ctx: &PoolContext,
    store: &dyn LedgerStore,
    journal: &RecoveryJournal,
    controller: &CycleController,
    batch: &StoreBatch,
    payment_sent: bool,
) -> Result<(), CycleError> {
    let result = if batch.is_empty() { Ok(()) } else { store.execute(batch).await };

    match result {
        Ok(()) => {
            if let Err(e) = journal.clear_outbox() {
                tracing::warn!(coin = %ctx.coin, "could not remove payment journal: {}", e);
            }
            Ok(())
        }
        Err(source) if payment_sent => {
            controller.disable();
            tracing::error!(
                coin = %ctx.coin,
                "Payments sent but could not update redis ({}). Disabling payment processing to prevent possible double-payouts.",
                source
            );
            match journal.write_recovery_artifact(batch) {
                Ok(path) => tracing::error!(
                    coin = %ctx.coin,
                    "The redis commands that were not run are in {}",
                    path.display()
                ),
                Err(e) => tracing::error!(
                    coin = %ctx.coin,
                    "Could not write recovery commands ({}): {:?}",
                    e,
                    batch.commands()
                ),
            }
            Err(CycleError::Commit { source, payment_sent })
        }
        Err(source) => {
            tracing::error!(coin = %ctx.coin, "ledger commit failed, nothing was paid: {}", source);
            if let Err(e) = journal.clear_outbox() {
                tracing::warn!(coin = %ctx.coin, "could not remove payment journal: {}", e);
            }
            Err(CycleError::Commit { source, payment_sent })
        }
    }
}
