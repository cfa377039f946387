/// Payment processing pipeline, one instance per pool.

pub mod allocator;
pub mod committer;
pub mod context;
pub mod cycle;
pub mod disburse;
pub mod loader;
pub mod reconciler;
pub mod recovery;
pub mod round;
pub mod scheduler;
pub mod sweeper;
pub mod worker;

pub use context::{setup_pool, PoolContext};
pub use cycle::{CycleController, CycleReport, CycleStage, PaymentProcessor};
pub use disburse::{AddressResolver, WorkerKeyResolver};
pub use recovery::RecoveryJournal;
pub use scheduler::PaymentScheduler;
