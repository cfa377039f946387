use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Per-worker accounting for one cycle. All amounts are smallest units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerAccount {
    pub key: String,
    /// Balance carried over from earlier cycles.
    pub balance_units: u64,
    /// Credited from this cycle's confirmed rounds.
    pub reward_units: u64,
    /// Amount included in the payment batch; zero when unpaid.
    pub sent_units: u64,
    /// `sent_units` in display units, as handed to the daemon.
    pub sent: Decimal,
    /// Net change applied to the stored balance on commit.
    pub balance_change_units: i128,
    /// Payout address the worker resolved to, when included in the batch.
    pub address: Option<String>,
}

impl WorkerAccount {
    pub fn new(key: &str) -> Self {
        Self { key: key.to_string(), ..Self::default() }
    }

    pub fn with_balance(key: &str, balance_units: u64) -> Self {
        Self { balance_units, ..Self::new(key) }
    }

    /// Amount the worker is owed before any payment.
    pub fn owed_units(&self) -> u64 {
        self.balance_units.saturating_add(self.reward_units)
    }

    /// Stored balance once this cycle commits.
    pub fn post_balance_units(&self) -> i128 {
        i128::from(self.balance_units) + self.balance_change_units
    }

    pub fn clear_payment(&mut self) {
        self.sent_units = 0;
        self.sent = Decimal::ZERO;
        self.address = None;
        self.balance_change_units = i128::from(self.reward_units);
    }
}

/// Keyed by worker; ordered so batches and commits are deterministic.
pub type Workers = BTreeMap<String, WorkerAccount>;

pub fn worker_entry<'a>(workers: &'a mut Workers, key: &str) -> &'a mut WorkerAccount {
    workers
        .entry(key.to_string())
        .or_insert_with(|| WorkerAccount::new(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_balance_tracks_change() {
        let mut w = WorkerAccount::with_balance("A", 40);
        w.reward_units = 60;
        assert_eq!(w.owed_units(), 100);

        w.sent_units = 100;
        w.balance_change_units = 60 - 100;
        assert_eq!(w.post_balance_units(), 0);

        w.clear_payment();
        assert_eq!(w.sent_units, 0);
        assert_eq!(w.post_balance_units(), 100);
    }

    #[test]
    fn test_post_balance_above_i64_range() {
        let mut w = WorkerAccount::with_balance("A", u64::MAX);
        w.reward_units = 10;
        w.clear_payment();
        assert_eq!(w.post_balance_units(), i128::from(u64::MAX) + 10);

        w.sent_units = u64::MAX;
        w.balance_change_units = 10 - i128::from(u64::MAX);
        assert_eq!(w.post_balance_units(), 10);
    }

    #[test]
    fn test_worker_entry_inserts_once() {
        let mut workers = Workers::new();
        worker_entry(&mut workers, "A").reward_units += 5;
        worker_entry(&mut workers, "A").reward_units += 7;
        assert_eq!(workers.len(), 1);
        assert_eq!(workers["A"].reward_units, 12);
    }
}
