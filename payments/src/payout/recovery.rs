/// Local payment journal for one coin.
///
/// * **Outbox** `{coin}_payment_outbox.json`: written right before `sendmany`,
///   removed once the ledger commit lands. Finding one at startup means a payment
///   may have left the wallet without its ledger update, so the pool stays off.
/// * **Recovery artifact** `{coin}_final_commands.json`: the redis-cli commands of
///   a commit that failed after payment, for an operator to replay by hand.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::store::StoreBatch;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub cycle_id: Uuid,
    pub coin: String,
    pub created_at: DateTime<Utc>,
    /// Address to display-unit amount, as passed to `sendmany`.
    pub amounts: BTreeMap<String, Decimal>,
    /// Ledger commit that must follow the payment.
    pub commands: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct RecoveryJournal {
    dir: PathBuf,
    coin: String,
}

impl RecoveryJournal {
    pub fn new(dir: impl AsRef<Path>, coin: &str) -> Self {
        Self { dir: dir.as_ref().to_path_buf(), coin: coin.to_string() }
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.dir.join(format!("{}_payment_outbox.json", self.coin))
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.dir.join(format!("{}_final_commands.json", self.coin))
    }

    pub fn has_outbox(&self) -> bool {
        self.outbox_path().exists()
    }

    pub fn read_outbox(&self) -> io::Result<Option<OutboxEntry>> {
        match std::fs::read(self.outbox_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn write_outbox(&self, entry: &OutboxEntry) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_atomic(&self.outbox_path(), &bytes)
    }

    pub fn clear_outbox(&self) -> io::Result<()> {
        match std::fs::remove_file(self.outbox_path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Writes the commit's commands as a JSON array of command arrays. An earlier
    /// artifact is never overwritten; later ones get a timestamp suffix.
    pub fn write_recovery_artifact(&self, batch: &StoreBatch) -> io::Result<PathBuf> {
        let mut path = self.artifact_path();
        if path.exists() {
            path = self.dir.join(format!(
                "{}_final_commands_{}.json",
                self.coin,
                Utc::now().format("%Y%m%dT%H%M%S%.3f")
            ));
        }

        let bytes = serde_json::to_vec_pretty(&batch.commands())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
