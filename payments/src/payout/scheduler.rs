use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::cycle::PaymentProcessor;
use crate::error::CycleError;
use crate::metrics::prometheus as metrics;

/// First cycle runs shortly after start, then every payment interval.
pub const INITIAL_DELAY: Duration = Duration::from_millis(100);

/// At most one cycle per pool. Held for the duration of a cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSlot {
    busy: Arc<AtomicBool>,
}

impl CycleSlot {
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard { busy: self.busy.clone() })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

pub struct SlotGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

pub struct PaymentScheduler {
    processor: Arc<PaymentProcessor>,
    interval: Duration,
    initial_delay: Duration,
    slot: CycleSlot,
    shutdown: watch::Sender<bool>,
}

impl PaymentScheduler {
    pub fn new(processor: Arc<PaymentProcessor>) -> Self {
        let interval = processor.context().payment_interval;
        let (shutdown, _) = watch::channel(false);
        Self {
            processor,
            interval,
            initial_delay: INITIAL_DELAY,
            slot: CycleSlot::default(),
            shutdown,
        }
    }

    pub fn with_timing(mut self, initial_delay: Duration, interval: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.interval = interval;
        self
    }

    pub fn coin(&self) -> &str {
        &self.processor.context().coin
    }

    /// Ticks while a cycle is still in flight are dropped, never queued.
    pub fn start(&self) -> JoinHandle<()> {
        let processor = self.processor.clone();
        let slot = self.slot.clone();
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval_at(Instant::now() + self.initial_delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            let coin = processor.context().coin.clone();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }

                if processor.controller().is_disabled() {
                    tracing::warn!(coin = %coin, "payment processing disabled, scheduler stopping");
                    break;
                }

                let Some(guard) = slot.try_acquire() else {
                    metrics::inc_ticks_skipped(&coin);
                    tracing::debug!(coin = %coin, "previous payment cycle still running, skipping tick");
                    continue;
                };

                let processor = processor.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    run_once(&processor).await;
                });
            }
            tracing::info!(coin = %coin, "payment scheduler stopped");
        })
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Waits for an in-flight cycle to finish, up to `limit`.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while self.slot.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

async fn run_once(processor: &PaymentProcessor) {
    let coin = &processor.context().coin;
    match processor.run_cycle().await {
        Ok(report) => {
            metrics::inc_cycles(coin);
            tracing::debug!(coin = %coin, "payment cycle done: {:?}", report);
        }
        Err(CycleError::Disabled) => {}
        Err(e) => {
            metrics::inc_cycle_failures(coin, e.stage());
            tracing::error!(coin = %coin, stage = e.stage(), "payment cycle aborted: {}", e);
        }
    }
}
