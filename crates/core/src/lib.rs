//! Shared types for the settlement workspace.
//!
//! Defines the data model common to every component: the UHS id and
//! compact transaction (`ctx`), the distributed transaction (`dtx`), the
//! runtime locking shard's ticket and key state (`ticket`), the shard-local
//! UHS element (`uhs`), the error hierarchy (`error`), and the traits
//! through which the core reaches external collaborators (`traits`).

#![warn(missing_docs)]

pub mod ctx;
pub mod dtx;
pub mod error;
pub mod ticket;
pub mod traits;
pub mod types;
pub mod uhs;

pub use ctx::{Ctx, CtxOutput};
pub use dtx::{Dtx, Phase, ShardRangeKey};
pub use error::{AdmissionError, Error, LockError, Result};
pub use ticket::{KeyLock, KeyState, LockType, QueuedRequest, Ticket, TicketState, WoundedDetails};
pub use traits::{AcceptAllVerifier, RangeProofVerifier, SignatureVerifier};
pub use types::{
    Attestation, BrokerId, Epoch, RuntimeKey, RuntimeValue, SentinelKey, ShardRange,
    TicketNumber, TxId, UhsId,
};
pub use uhs::{AuditResult, SettledBlock, UhsElement};
