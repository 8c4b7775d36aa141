//! The runtime locking shard: a deadlock-free, wound-wait lock manager for
//! multi-key transactions over an arbitrary key/value space.
//!
//! Tickets are numbered by an external ticket machine; older tickets
//! (lower numbers) always win contention against younger ones, so a
//! younger lock holder blocking an older requester is wounded rather than
//! allowed to make the older ticket wait. This guarantees every ticket
//! eventually makes progress without a deadlock detector.

#![warn(missing_docs)]

pub mod manager;
pub mod recovery;

pub use manager::{LockOutcome, ReplyFn, RuntimeLockManager};
pub use recovery::{replay, LogEntry};
