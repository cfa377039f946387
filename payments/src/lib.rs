pub mod blockchain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod payout;
pub mod store;
