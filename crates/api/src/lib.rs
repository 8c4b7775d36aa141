//! TCP RPC plumbing shared by every settlement daemon: length-prefixed
//! framing, a request/response-correlating client, a threaded server over
//! a pluggable [`server::Handler`], and the handler/client implementations
//! for each surface named in the external interfaces.

#![warn(missing_docs)]

pub mod broker_client;
pub mod client;
pub mod framing;
pub mod handlers;
pub mod server;
pub mod shard_client;

pub use broker_client::RemoteBrokerClient;
pub use client::RpcClient;
pub use handlers::{RuntimeLockingShardHandler, SentinelHandler, ShardHandler};
pub use server::{BlockingFn, Handler, Reply, TcpServer};
pub use shard_client::RemoteShardClient;
