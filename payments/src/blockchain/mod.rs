/// Blockchain communication module
/// Daemon seam used by the payment pipeline plus the JSON-RPC transport behind it

pub mod daemon;
pub mod rpc_client;
#[cfg(test)]
pub mod scripted;

pub use daemon::{AddressInfo, ChainDaemon, RpcCall, RpcErrorObject, RpcReply};
pub use rpc_client::DaemonRpcClient;
