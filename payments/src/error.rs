//! Error types shared by the payment pipeline.
//!
//! Daemon and store adapters report `RpcError` / `StoreError`; every pipeline
//! stage maps its failure into a `CycleError` variant so the scheduler can log
//! which stage aborted the cycle.

use std::time::Duration;
use thiserror::Error;

/// Daemon error code for "invalid address or key" (unknown transaction).
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// Daemon error code for "insufficient funds" (wallet can't cover amounts + fee).
pub const RPC_WALLET_INSUFFICIENT_FUNDS: i64 = -6;

#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("RPC connection failed: {0}")]
    Transport(String),

    #[error("RPC request timed out after {0:?}")]
    Timeout(Duration),

    #[error("RPC circuit breaker is open")]
    CircuitOpen,

    #[error("RPC HTTP error: {0}")]
    Http(u16),

    #[error("daemon error {code}: {message}")]
    Daemon { code: i64, message: String },

    #[error("malformed RPC response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Daemon-side error code, if the daemon answered with one.
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Daemon { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_insufficient_funds(&self) -> bool {
        self.code() == Some(RPC_WALLET_INSUFFICIENT_FUNDS)
    }

    /// True when the daemon answered and refused the call. Timeouts, dropped
    /// connections and unreadable replies leave it unknown whether it ran.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RpcError::Daemon { .. } | RpcError::Http(_) | RpcError::CircuitOpen)
    }
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected store reply: {0}")]
    Decode(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Why a payment cycle stopped before reaching `Idle`.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("payment processing is disabled for this pool")]
    Disabled,

    #[error("could not load balances and pending blocks: {0}")]
    Load(#[source] StoreError),

    #[error("balance for worker {worker} is not a number: {value:?}")]
    InvalidBalance { worker: String, value: String },

    #[error("daemon batch gettransaction failed: {0}")]
    Reconcile(#[source] RpcError),

    #[error("daemon batch returned {got} replies, expected {expected}")]
    ReplyCountMismatch { expected: usize, got: usize },

    #[error("could not read round shares: {0}")]
    ShareLookup(#[source] StoreError),

    #[error("could not retire kicked/orphaned rounds: {0}")]
    Sweep(#[source] StoreError),

    #[error("sendmany failed: {0}")]
    Payment(#[source] RpcError),

    #[error("payment journal I/O failed: {0}")]
    Journal(#[from] std::io::Error),

    #[error("ledger commit failed (payment sent: {payment_sent}): {source}")]
    Commit {
        #[source]
        source: StoreError,
        payment_sent: bool,
    },
}

impl CycleError {
    /// Stage label used in logs and the failure metric.
    pub fn stage(&self) -> &'static str {
        match self {
            CycleError::Disabled => "disabled",
            CycleError::Load(_) | CycleError::InvalidBalance { .. } => "collect",
            CycleError::Reconcile(_) | CycleError::ReplyCountMismatch { .. } => "reconcile",
            CycleError::ShareLookup(_) => "allocate",
            CycleError::Sweep(_) => "sweep",
            CycleError::Payment(_) | CycleError::Journal(_) => "disburse",
            CycleError::Commit { .. } => "commit",
        }
    }
}
