//! Wire envelope and per-surface RPC payloads.
//!
//! One envelope shape (`Request<P>`/`Response<R>`) serves every RPC
//! surface in the workspace: coordinator-to-shard, broker-to-runtime-
//! locking-shard, client-to-sentinel, and log replication. Each surface
//! supplies its own payload type; `rmp-serde` is the wire codec throughout.

#![warn(missing_docs)]

pub mod envelope;
pub mod payloads;

pub use envelope::{decode, encode, ApiError, Request, Response};
pub use payloads::{
    AdmissionRequest, AdmissionResponse, BrokerRequest, BrokerResponse, LockOutcomeMessage,
    LogCommand, SentinelRequest, SentinelResponse, ShardRequest, ShardResponse,
};
