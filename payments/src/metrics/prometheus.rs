use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, TextEncoder};
use prometheus::core::Collector;
use std::sync::OnceLock;

static CYCLES: OnceLock<IntCounterVec> = OnceLock::new();
static CYCLE_FAILURES: OnceLock<IntCounterVec> = OnceLock::new();
static TICKS_SKIPPED: OnceLock<IntCounterVec> = OnceLock::new();

static ROUNDS: OnceLock<IntCounterVec> = OnceLock::new();
static WORKERS_PAID: OnceLock<IntCounterVec> = OnceLock::new();
static UNITS_PAID: OnceLock<IntCounterVec> = OnceLock::new();
static WITHHOLD_RETRIES: OnceLock<IntCounterVec> = OnceLock::new();

static RPC_REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();
static RPC_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();
static STORE_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

static POOL_DISABLED: OnceLock<IntGaugeVec> = OnceLock::new();

fn cycles() -> &'static IntCounterVec {
    CYCLES.get_or_init(|| {
        IntCounterVec::new(
            Opts::new("payment_cycles_total", "Payment cycles that ran to completion"),
            &["coin"],
        ).unwrap()
    })
}

fn cycle_failures() -> &'static IntCounterVec {
    CYCLE_FAILURES.get_or_init(|| {
        IntCounterVec::new(
            Opts::new("payment_cycle_failures_total", "Payment cycles aborted, by stage"),
            &["coin", "stage"],
        ).unwrap()
    })
}

fn ticks_skipped() -> &'static IntCounterVec {
    TICKS_SKIPPED.get_or_init(|| {
        IntCounterVec::new(
            Opts::new(
                "payment_ticks_skipped_total",
                "Timer ticks dropped because a cycle was still in flight",
            ),
            &["coin"],
        ).unwrap()
    })
}

fn rounds() -> &'static IntCounterVec {
    ROUNDS.get_or_init(|| {
        IntCounterVec::new(
            Opts::new("payment_rounds_total", "Rounds retired, by terminal set"),
            &["coin", "outcome"],
        ).unwrap()
    })
}

fn workers_paid() -> &'static IntCounterVec {
    WORKERS_PAID.get_or_init(|| {
        IntCounterVec::new(
            Opts::new("payment_workers_paid_total", "Worker payments included in a sent batch"),
            &["coin"],
        ).unwrap()
    })
}

fn units_paid() -> &'static IntCounterVec {
    UNITS_PAID.get_or_init(|| {
        IntCounterVec::new(
            Opts::new("payment_units_paid_total", "Amount sent to workers (smallest units)"),
            &["coin"],
        ).unwrap()
    })
}

fn withhold_retries() -> &'static IntCounterVec {
    WITHHOLD_RETRIES.get_or_init(|| {
        IntCounterVec::new(
            Opts::new(
                "payment_withhold_retries_total",
                "sendmany retries after an insufficient-funds reply",
            ),
            &["coin"],
        ).unwrap()
    })
}

fn rpc_requests() -> &'static IntCounterVec {
    RPC_REQUESTS.get_or_init(|| {
        IntCounterVec::new(Opts::new("rpc_requests_total", "Total RPC requests to the daemon"), &["coin"])
            .unwrap()
    })
}

fn rpc_errors() -> &'static IntCounterVec {
    RPC_ERRORS.get_or_init(|| {
        IntCounterVec::new(Opts::new("rpc_errors_total", "Total daemon RPC transport errors"), &["coin"])
            .unwrap()
    })
}

fn store_errors() -> &'static IntCounterVec {
    STORE_ERRORS.get_or_init(|| {
        IntCounterVec::new(Opts::new("redis_errors_total", "Total Redis operation errors"), &["coin"])
            .unwrap()
    })
}

fn pool_disabled() -> &'static IntGaugeVec {
    POOL_DISABLED.get_or_init(|| {
        IntGaugeVec::new(
            Opts::new("payment_pool_disabled", "Payment processing disabled for the pool (1/0)"),
            &["coin"],
        ).unwrap()
    })
}

pub fn inc_cycles(coin: &str) {
    cycles().with_label_values(&[coin]).inc();
}

pub fn inc_cycle_failures(coin: &str, stage: &str) {
    cycle_failures().with_label_values(&[coin, stage]).inc();
}

pub fn inc_ticks_skipped(coin: &str) {
    ticks_skipped().with_label_values(&[coin]).inc();
}

pub fn inc_rounds(coin: &str, outcome: &str, count: usize) {
    rounds().with_label_values(&[coin, outcome]).inc_by(count as u64);
}

pub fn record_payment(coin: &str, workers: usize, units: u64) {
    workers_paid().with_label_values(&[coin]).inc_by(workers as u64);
    units_paid().with_label_values(&[coin]).inc_by(units);
}

pub fn inc_withhold_retries(coin: &str) {
    withhold_retries().with_label_values(&[coin]).inc();
}

pub fn inc_rpc_requests(coin: &str) {
    rpc_requests().with_label_values(&[coin]).inc();
}

pub fn inc_rpc_errors(coin: &str) {
    rpc_errors().with_label_values(&[coin]).inc();
}

pub fn inc_store_errors(coin: &str) {
    store_errors().with_label_values(&[coin]).inc();
}

pub fn set_pool_disabled(coin: &str, disabled: bool) {
    pool_disabled().with_label_values(&[coin]).set(i64::from(disabled));
}

pub fn render() -> String {
    let enc = TextEncoder::new();
    let mut mfs = Vec::new();

    mfs.extend(cycles().collect());
    mfs.extend(cycle_failures().collect());
    mfs.extend(ticks_skipped().collect());
    mfs.extend(rounds().collect());
    mfs.extend(workers_paid().collect());
    mfs.extend(units_paid().collect());
    mfs.extend(withhold_retries().collect());
    mfs.extend(rpc_requests().collect());
    mfs.extend(rpc_errors().collect());
    mfs.extend(store_errors().collect());
    mfs.extend(pool_disabled().collect());

    // a labelled vec with no series yet yields an empty family, which the encoder rejects
    mfs.retain(|mf| !mf.get_metric().is_empty());

    let mut buf = Vec::new();
    if let Err(e) = enc.encode(&mfs, &mut buf) {
        tracing::error!("failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buf).to_string()
}

#[cfg(test)]
pub fn ticks_skipped_count(coin: &str) -> u64 {
    ticks_skipped().with_label_values(&[coin]).get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_labeled_series() {
        inc_cycles("MTRC");
        inc_cycle_failures("MTRC", "commit");
        set_pool_disabled("MTRC", true);

        let text = render();
        assert!(text.contains("payment_cycles_total{coin=\"MTRC\"}"));
        assert!(text.contains("payment_cycle_failures_total{coin=\"MTRC\",stage=\"commit\"}"));
        assert!(text.contains("payment_pool_disabled{coin=\"MTRC\"} 1"));
    }

    #[test]
    fn test_render_skips_families_without_series() {
        set_pool_disabled("SPARSE", false);

        // withhold retries and store errors may have no series yet; later families still render
        let text = render();
        assert!(text.contains("payment_pool_disabled{coin=\"SPARSE\"} 0"));
        assert!(!text.contains("payment_withhold_retries_total{coin=\"SPARSE\"}"));
    }
}
