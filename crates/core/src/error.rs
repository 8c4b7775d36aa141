//! Error hierarchy shared by every settlement crate.
//!
//! Mirrors the four error classes named in the component design: admission
//! rejections are surfaced synchronously and mutate no state, transient
//! distributed errors drive a dtx to `Failed` and are retried by a future
//! leader, protocol violations are bugs the node refuses to paper over, and
//! runtime-locking-shard errors are returned by value to the broker.

use std::io;
use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors a locking shard or coordinator can encounter outside the
/// dedicated [`LockError`] taxonomy used by the runtime locking shard.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O failure (log append, socket, file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A CTX failed admission (bad attestation, duplicate id, batch full).
    #[error("admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    /// A shard or coordinator operation could not complete because of a
    /// transient condition (shard unreachable, leader lost mid-phase).
    /// Recoverable: the coordinator retries through a future leader.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The caller violated the dtx_id/ticket protocol (e.g. commit without
    /// prepare). Per the error-handling design this is never downgraded to
    /// a recoverable error: the caller should treat it as a bug and crash.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Serialization failure when encoding/decoding a log record or wire
    /// message.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Reasons a CTX is refused admission. Carries no durable effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Fewer than `attestation_threshold` valid sentinel signatures.
    #[error("insufficient attestations: got {got}, need {need}")]
    InsufficientAttestations {
        /// Number of valid attestations found.
        got: usize,
        /// Configured threshold.
        need: usize,
    },
    /// An attestation's public key is not in `sentinel_public_keys`.
    #[error("attestation from unrecognized sentinel key")]
    UnknownSentinel,
    /// A signature failed verification.
    #[error("attestation signature failed verification")]
    BadSignature,
    /// The CTX's `id` collides with a CTX already in the current batch.
    #[error("duplicate ctx id in current batch")]
    DuplicateInBatch,
    /// The admission window is full and backpressure has been exhausted.
    #[error("admission window is full")]
    WindowFull,
    /// The CTX violates a structural invariant (e.g. input aliases id).
    #[error("malformed ctx: {0}")]
    Malformed(String),
}

/// Typed errors returned by the runtime locking shard, per the component
/// design's dedicated error taxonomy. Always returned by value, never
/// wrapped in an opaque error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// `first_lock` was false but the ticket has never been seen.
    #[error("unknown ticket")]
    UnknownTicket,
    /// The ticket has already prepared and is immune to further locking.
    #[error("ticket is prepared")]
    Prepared,
    /// The ticket has already committed.
    #[error("ticket is committed")]
    Committed,
    /// The ticket was wounded by an older, higher-priority ticket.
    #[error("ticket wounded by {wounding_ticket} on key")]
    Wounded {
        /// The ticket number that caused the wound.
        wounding_ticket: u64,
        /// The key contended over.
        wounding_key: Vec<u8>,
    },
    /// The ticket already holds at least the requested lock on this key.
    #[error("lock already held")]
    LockHeld,
    /// The ticket is already queued on this key.
    #[error("lock already queued")]
    LockQueued,
    /// `prepare` referenced a key the ticket does not hold for writing.
    #[error("lock not held for key")]
    LockNotHeld,
    /// `prepare` tried to update a key the ticket only holds a read lock on.
    #[error("state update references a read-locked key")]
    StateUpdateWithReadLock,
    /// `commit` was called on a ticket that never prepared.
    #[error("ticket not prepared")]
    NotPrepared,
    /// `finish` was called on a ticket that never committed.
    #[error("ticket not committed")]
    NotCommitted,
    /// Internal failure unrelated to lock semantics (I/O, codec).
    #[error("internal error: {0}")]
    Internal(String),
}
