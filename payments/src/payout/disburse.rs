/// Payment batch construction and `sendmany` with withhold retries.
///
/// Each worker owed at least the minimum payment is paid `floor(owed * (1 - w))`
/// where `w` starts at zero and grows by the pool's withhold step every time the
/// wallet answers "insufficient funds". Whatever is not sent stays credited.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::context::PoolContext;
use super::worker::Workers;
use crate::blockchain::ChainDaemon;
use crate::error::CycleError;
use crate::metrics::prometheus as metrics;

/// Maps a worker key to its payout address.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, worker: &str) -> String;
}

/// Worker keys are payout addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerKeyResolver;

impl AddressResolver for WorkerKeyResolver {
    fn resolve(&self, worker: &str) -> String {
        worker.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentBatch {
    /// Address to display-unit amount.
    pub amounts: BTreeMap<String, Decimal>,
    pub total_units: u64,
    pub recipients: usize,
}

impl PaymentBatch {
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisburseOutcome {
    /// Nobody reached the minimum payment.
    NothingToPay,
    Paid { txid: String },
    /// The wallet could not fund any payment even after withholding.
    Degraded,
}

#[derive(Debug, Clone)]
pub struct Disbursement {
    pub outcome: DisburseOutcome,
    pub batch: PaymentBatch,
    pub withhold: Decimal,
    pub attempts: u32,
}

impl Disbursement {
    pub fn payment_sent(&self) -> bool {
        matches!(self.outcome, DisburseOutcome::Paid { .. })
    }
}

/// Fills `sent_units` / `balance_change_units` for every worker at withhold `w`
/// and returns the per-address batch.
pub fn build_batch(
    ctx: &PoolContext,
    workers: &mut Workers,
    withhold: Decimal,
    resolver: &dyn AddressResolver,
) -> PaymentBatch {
    let keep = (Decimal::ONE - withhold).max(Decimal::ZERO);
    let mut batch = PaymentBatch::default();

    for worker in workers.values_mut() {
        worker.clear_payment();

        let owed = worker.owed_units();
        let to_send = (Decimal::from(owed) * keep).floor().to_u64().unwrap_or(0).min(owed);
        if to_send == 0 || to_send < ctx.min_payment_units {
            continue;
        }

        let address = resolver.resolve(&worker.key);
        worker.sent_units = to_send;
        worker.sent = ctx.to_display(to_send);
        worker.balance_change_units = i128::from(worker.reward_units) - i128::from(to_send);
        *batch.amounts.entry(address.clone()).or_insert(Decimal::ZERO) += worker.sent;
        worker.address = Some(address);

        batch.total_units += to_send;
        batch.recipients += 1;
    }
    batch
}

/// Sends the cycle's payments. `before_send` runs ahead of every `sendmany`
/// attempt with the workers as they will be paid.
pub async fn disburse<F>(
    ctx: &PoolContext,
    daemon: &dyn ChainDaemon,
    resolver: &dyn AddressResolver,
    workers: &mut Workers,
    account: &str,
    mut before_send: F,
) -> Result<Disbursement, CycleError>
where
    F: FnMut(&Workers, &PaymentBatch) -> Result<(), CycleError> + Send,
{
    let mut withhold = Decimal::ZERO;
    let mut attempts = 0;

    loop {
        let batch = build_batch(ctx, workers, withhold, resolver);
        if batch.is_empty() {
            let outcome = if withhold.is_zero() {
                DisburseOutcome::NothingToPay
            } else {
                tracing::error!(
                    coin = %ctx.coin,
                    "Wallet cannot fund payments even at {}% withheld; balances stay credited",
                    withhold * Decimal::ONE_HUNDRED
                );
                DisburseOutcome::Degraded
            };
            return Ok(Disbursement { outcome, batch, withhold, attempts });
        }

        before_send(&*workers, &batch)?;
        attempts += 1;

        match daemon.send_many(account, &batch.amounts).await {
            Ok(txid) => {
                tracing::info!(
                    coin = %ctx.coin,
                    "💰 Sent {} to {} workers (txid {}){}",
                    ctx.to_display(batch.total_units),
                    batch.recipients,
                    txid,
                    if withhold.is_zero() {
                        String::new()
                    } else {
                        format!(", {}% withheld for fees", withhold * Decimal::ONE_HUNDRED)
                    }
                );
                metrics::record_payment(&ctx.coin, batch.recipients, batch.total_units);
                return Ok(Disbursement {
                    outcome: DisburseOutcome::Paid { txid },
                    batch,
                    withhold,
                    attempts,
                });
            }
            Err(e) if e.is_insufficient_funds() => {
                withhold = (withhold + ctx.withhold_step).min(Decimal::ONE);
                metrics::inc_withhold_retries(&ctx.coin);
                tracing::warn!(
                    coin = %ctx.coin,
                    "Insufficient funds for {} to {} workers, retrying with {}% withheld",
                    ctx.to_display(batch.total_units),
                    batch.recipients,
                    withhold * Decimal::ONE_HUNDRED
                );
            }
            Err(e) => {
                tracing::error!(coin = %ctx.coin, "Error trying to send payments with RPC sendmany: {}", e);
                for worker in workers.values_mut() {
                    worker.clear_payment();
                }
                return Err(CycleError::Payment(e));
            }
        }
    }
}
