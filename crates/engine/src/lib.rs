//! Locking-shard operations, the distributed-transaction driver, and the
//! coordinator/runtime-locking-shard controllers built on top of
//! `settlement-storage` and `settlement-durability`.

#![warn(missing_docs)]

pub mod coordinator;
pub mod driver;
pub mod dtx_state_machine;
pub mod runtime_shard;

pub use coordinator::{CoordinatorConfig, CoordinatorController, CtxOutcome, ReplyFn, VerifyFn};
pub use driver::{Driver, DriverHooks, LocalShardClient, NoopHooks, ShardClient};
pub use dtx_state_machine::{Applied, CoordinatorState, DtxCommand, Snapshot};
pub use runtime_shard::{RuntimeLockingShardController, TicketLogState};
