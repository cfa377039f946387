/// One payment cycle: collect → reconcile → allocate → sweep → disburse → commit.
///
/// `CycleController` holds the per-pool disabled flag and the current stage;
/// once disabled (commit failed after payment, or the payment outcome is
/// unknown) no further cycle runs until an operator restarts the processor.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::allocator;
use super::committer;
use super::context::PoolContext;
use super::disburse::{self, AddressResolver, DisburseOutcome, WorkerKeyResolver};
use super::loader;
use super::reconciler;
use super::recovery::{OutboxEntry, RecoveryJournal};
use super::sweeper;
use crate::blockchain::ChainDaemon;
use crate::error::CycleError;
use crate::metrics::prometheus as metrics;
use crate::store::{LedgerStore, StoreOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CycleStage {
    Idle = 0,
    Collecting = 1,
    Reconciling = 2,
    Allocating = 3,
    Sweeping = 4,
    Disbursing = 5,
    Committing = 6,
    Disabled = 7,
}

impl CycleStage {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CycleStage::Collecting,
            2 => CycleStage::Reconciling,
            3 => CycleStage::Allocating,
            4 => CycleStage::Sweeping,
            5 => CycleStage::Disbursing,
            6 => CycleStage::Committing,
            7 => CycleStage::Disabled,
            _ => CycleStage::Idle,
        }
    }
}

pub struct CycleController {
    coin: String,
    disabled: AtomicBool,
    stage: AtomicU8,
}

impl CycleController {
    pub fn new(coin: &str) -> Self {
        Self {
            coin: coin.to_string(),
            disabled: AtomicBool::new(false),
            stage: AtomicU8::new(CycleStage::Idle as u8),
        }
    }

    pub fn disable(&self) {
        if !self.disabled.swap(true, Ordering::SeqCst) {
            metrics::set_pool_disabled(&self.coin, true);
        }
        self.stage.store(CycleStage::Disabled as u8, Ordering::SeqCst);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn stage(&self) -> CycleStage {
        CycleStage::from_u8(self.stage.load(Ordering::SeqCst))
    }

    fn enter(&self, stage: CycleStage) {
        if !self.is_disabled() {
            self.stage.store(stage as u8, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub confirmed: usize,
    pub orphaned: usize,
    pub kicked: usize,
    pub deferred: usize,
    pub workers_paid: usize,
    pub total_paid: Decimal,
    pub withhold: Decimal,
    pub txid: Option<String>,
}

#[derive(Debug, Default)]
struct Timings {
    store: Duration,
    daemon: Duration,
}

pub struct PaymentProcessor {
    ctx: PoolContext,
    daemon: Arc<dyn ChainDaemon>,
    store: Arc<dyn LedgerStore>,
    journal: RecoveryJournal,
    resolver: Arc<dyn AddressResolver>,
    controller: Arc<CycleController>,
}

impl PaymentProcessor {
    pub fn new(
        ctx: PoolContext,
        daemon: Arc<dyn ChainDaemon>,
        store: Arc<dyn LedgerStore>,
        journal: RecoveryJournal,
    ) -> Self {
        let controller = Arc::new(CycleController::new(&ctx.coin));
        metrics::set_pool_disabled(&ctx.coin, false);
        Self {
            ctx,
            daemon,
            store,
            journal,
            resolver: Arc::new(WorkerKeyResolver),
            controller,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn context(&self) -> &PoolContext {
        &self.ctx
    }

    pub fn controller(&self) -> Arc<CycleController> {
        self.controller.clone()
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        if self.controller.is_disabled() {
            return Err(CycleError::Disabled);
        }

        let started = Instant::now();
        let mut timings = Timings::default();
        let result = self.run_stages(&mut timings).await;
        self.controller.enter(CycleStage::Idle);

        tracing::info!(
            coin = %self.ctx.coin,
            "Finished interval - time spent: {}ms total, {}ms redis, {}ms daemon",
            started.elapsed().as_millis(),
            timings.store.as_millis(),
            timings.daemon.as_millis()
        );
        result
    }

    async fn run_stages(&self, timings: &mut Timings) -> Result<CycleReport, CycleError> {
        let ctx = &self.ctx;
        let mut report = CycleReport::default();

        self.controller.enter(CycleStage::Collecting);
        let t = Instant::now();
        let loaded = loader::load(ctx, self.store.as_ref()).await?;
        timings.store += t.elapsed();
        let mut workers = loaded.workers;
        report.deferred = loaded.deferred;

        self.controller.enter(CycleStage::Reconciling);
        let t = Instant::now();
        let classified = reconciler::classify(ctx, self.daemon.as_ref(), loaded.rounds).await?;
        timings.daemon += t.elapsed();
        let mut rounds = classified.rounds;

        self.controller.enter(CycleStage::Allocating);
        let t = Instant::now();
        allocator::allocate(ctx, self.store.as_ref(), &mut rounds, &mut workers).await?;
        timings.store += t.elapsed();

        self.controller.enter(CycleStage::Sweeping);
        let (sweep, confirmed) = sweeper::sweep(&ctx.keys, rounds);
        report.confirmed = confirmed.len();
        for op in sweep.ops() {
            if let StoreOp::SMove { to, .. } = op {
                if *to == ctx.keys.blocks_orphaned() {
                    report.orphaned += 1;
                } else if *to == ctx.keys.blocks_kicked() {
                    report.kicked += 1;
                }
            }
        }
        if !sweep.is_empty() {
            let t = Instant::now();
            self.store.execute(&sweep).await.map_err(CycleError::Sweep)?;
            timings.store += t.elapsed();
            metrics::inc_rounds(&ctx.coin, "orphaned", report.orphaned);
            metrics::inc_rounds(&ctx.coin, "kicked", report.kicked);
        }

        self.controller.enter(CycleStage::Disbursing);
        let cycle_id = Uuid::new_v4();
        let journal = &self.journal;
        let confirmed_ref = &confirmed;
        let t = Instant::now();
        let disbursed = disburse::disburse(
            ctx,
            self.daemon.as_ref(),
            self.resolver.as_ref(),
            &mut workers,
            &classified.account,
            |workers, batch| {
                let entry = OutboxEntry {
                    cycle_id,
                    coin: ctx.coin.clone(),
                    created_at: Utc::now(),
                    amounts: batch.amounts.clone(),
                    commands: committer::build_commit(ctx, confirmed_ref, workers).commands(),
                };
                journal.write_outbox(&entry).map_err(CycleError::Journal)
            },
        )
        .await;
        timings.daemon += t.elapsed();

        let disbursed = match disbursed {
            Ok(d) => d,
            Err(CycleError::Payment(e)) if !e.is_rejection() => {
                self.controller.disable();
                tracing::error!(
                    coin = %ctx.coin,
                    "Outcome of sendmany unknown ({}). Disabling payment processing; check the wallet against {}",
                    e,
                    self.journal.outbox_path().display()
                );
                return Err(CycleError::Payment(e));
            }
            Err(e) => {
                self.discard_outbox();
                return Err(e);
            }
        };
        if !disbursed.payment_sent() {
            self.discard_outbox();
        }
        report.withhold = disbursed.withhold;
        if let DisburseOutcome::Paid { txid } = &disbursed.outcome {
            report.txid = Some(txid.clone());
            report.workers_paid = disbursed.batch.recipients;
        }

        self.controller.enter(CycleStage::Committing);
        let batch = committer::build_commit(ctx, &confirmed, &workers);
        report.total_paid = committer::total_paid(ctx, &batch);
        let t = Instant::now();
        committer::commit(
            ctx,
            self.store.as_ref(),
            &self.journal,
            &self.controller,
            &batch,
            disbursed.payment_sent(),
        )
        .await?;
        timings.store += t.elapsed();
        metrics::inc_rounds(&ctx.coin, "confirmed", report.confirmed);

        Ok(report)
    }

    fn discard_outbox(&self) {
        if let Err(e) = self.journal.clear_outbox() {
            tracing::warn!(coin = %self.ctx.coin, "could not remove payment journal: {}", e);
        }
    }
}
