//! Replicated, leader-elected append-only log shared by the coordinator
//! and the runtime locking shard's state machines.
//!
//! One segment format and one generic [`ReplicatedLog`] type back both:
//! each caller supplies its own [`StateMachine`] implementation and
//! `Command`/`Applied` types, matching "coordinator and each shard have
//! independent log streams".

#![warn(missing_docs)]

pub mod election;
pub mod error;
pub mod format;
pub mod log;
pub mod mode;

pub use election::StaticElection;
pub use error::{Result, WalError};
pub use log::{LogRole, ReplicatedLog, StateMachine};
pub use mode::DurabilityMode;
