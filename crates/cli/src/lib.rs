//! Shared config loading and shutdown plumbing for the settlement daemon
//! binaries (`coordinatord`, `shardd`, `runtime-locking-shardd`).

#![warn(missing_docs)]

pub mod config;
pub mod shutdown;

pub use config::{ConfigError, DaemonConfig, ShardEndpoint};
pub use shutdown::StopToken;
