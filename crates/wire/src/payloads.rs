//! Per-surface request/response payloads carried inside the envelope.
//!
//! One type per RPC surface named in the external interfaces: sentinel to
//! coordinator (`AdmissionRequest`/`AdmissionResponse`), coordinator to
//! shard (`ShardRequest`), broker to runtime locking shard
//! (`BrokerRequest`), client to sentinel (`SentinelRequest`), and the
//! generic command a [`crate::LogCommand`] replicates between a log's
//! leader and its followers.

use serde::{Deserialize, Serialize};
use settlement_core::{
    Attestation, BrokerId, Ctx, LockType, RuntimeKey, RuntimeValue, TicketNumber, TicketState,
    TxId, UhsId,
};
use std::collections::HashMap;

/// Coordinator-to-shard RPC: `lock`/`apply`/`discard` plus the two
/// observational queries a shard answers directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShardRequest {
    /// `lock_outputs` for every item of `items` participating in this
    /// shard's range. `items` pairs a batch index with its ctx.
    LockOutputs {
        /// The dtx these ctxs belong to.
        dtx_id: TxId,
        /// `(batch index, ctx)` pairs this shard participates in.
        items: Vec<(usize, Ctx)>,
    },
    /// `apply_outputs`, keyed by the driver's merged complete bit per
    /// batch index.
    ApplyOutputs {
        /// The dtx to apply.
        dtx_id: TxId,
        /// Batch index -> whether every participating shard locked it.
        global_complete: HashMap<usize, bool>,
    },
    /// `discard_dtx`, forgetting cached state for `dtx_id`.
    DiscardDtx {
        /// The dtx to forget.
        dtx_id: TxId,
    },
    /// Observational: is `id` currently unspent on this shard?
    CheckUnspent {
        /// The id to look up.
        id: UhsId,
    },
    /// Observational: has `id` been recorded as a recently completed ctx?
    CheckTxId {
        /// The ctx id to look up.
        id: TxId,
    },
}

/// Responses a shard returns for each [`ShardRequest`] variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShardResponse {
    /// Per-item lock outcome, in request order.
    Bitmap(Vec<bool>),
    /// No payload beyond success.
    Unit,
    /// A boolean observational answer.
    Bool(bool),
}

/// Broker-to-runtime-locking-shard RPC: the six operations a broker drives
/// a ticket through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrokerRequest {
    /// Request a lock on `key` for `ticket_number`. `first_lock` names a
    /// fresh ticket the shard has not seen before. The grant or wound is
    /// delivered asynchronously as a [`LockOutcomeMessage`], not in the
    /// immediate response to this request.
    TryLock {
        /// The requesting ticket.
        ticket_number: TicketNumber,
        /// The broker issuing this ticket.
        broker_id: BrokerId,
        /// Key being locked.
        key: RuntimeKey,
        /// Read or write.
        lock_type: LockType,
        /// Whether this is the ticket's first lock request.
        first_lock: bool,
    },
    /// Buffer a state update and mark the ticket prepared.
    Prepare {
        /// The ticket to prepare.
        ticket_number: TicketNumber,
        /// The broker that owns `ticket_number`.
        broker_id: BrokerId,
        /// Values to apply to held write-locked keys on commit.
        state_update: HashMap<RuntimeKey, RuntimeValue>,
    },
    /// Apply the buffered state update and release write locks.
    Commit {
        /// The ticket to commit.
        ticket_number: TicketNumber,
    },
    /// Abandon a prepared ticket without applying its update.
    Rollback {
        /// The ticket to roll back.
        ticket_number: TicketNumber,
    },
    /// Forget a committed ticket's bookkeeping.
    Finish {
        /// The ticket to forget.
        ticket_number: TicketNumber,
    },
    /// List every ticket currently tracked for `broker_id`, for recovery.
    GetTickets {
        /// The broker to query.
        broker_id: BrokerId,
    },
}

/// Immediate responses to a [`BrokerRequest`]. `TryLock` only ever
/// acknowledges that the request was accepted into the lock manager; the
/// grant/wound outcome itself arrives later as a [`LockOutcomeMessage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrokerResponse {
    /// The request was accepted; outcome (if any) follows asynchronously.
    Accepted,
    /// No payload beyond success.
    Unit,
    /// Answer to `GetTickets`.
    Tickets(HashMap<TicketNumber, TicketState>),
}

/// Pushed to a broker once a `TryLock` it issued resolves, since grants can
/// be delayed behind a queue and wounds can arrive out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOutcomeMessage {
    /// The ticket the outcome applies to.
    pub ticket_number: TicketNumber,
    /// The key that was requested.
    pub key: RuntimeKey,
    /// Whether the lock was granted or the ticket was wounded.
    pub granted: bool,
    /// Populated iff `granted` is false.
    pub wounding_ticket: Option<TicketNumber>,
    /// Populated iff `granted` is false.
    pub wounding_key: Option<RuntimeKey>,
}

/// Sentinel-to-coordinator admission RPC: submit a ctx for settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRequest {
    /// The ctx to admit.
    pub ctx: Ctx,
}

/// The coordinator's answer to an [`AdmissionRequest`]. A dropped
/// connection rather than either variant means the leader failed before
/// replying; the caller retries via the watchtower path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionResponse {
    /// The ctx's dtx reached `Commit` and this ctx's slot was complete.
    Completed,
    /// The ctx's dtx was rolled back; at least one input was unavailable.
    Aborted,
}

/// Client-to-sentinel admission RPC: request an attestation over a ctx id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SentinelRequest {
    /// Ask this sentinel to attest `ctx_id`.
    Attest {
        /// The ctx id to attest.
        ctx_id: TxId,
    },
}

/// Sentinel responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SentinelResponse {
    /// The sentinel's attestation over the requested ctx id.
    Attestation(Attestation),
    /// The sentinel declined to attest (e.g. unknown ctx, policy refusal).
    Declined,
}

/// One command replicated from a log's leader to its followers, tagged
/// with the term it was proposed under. The command type `C` itself is
/// supplied by the caller — the coordinator's dtx state machine and the
/// runtime locking shard's ticket state machine each define their own,
/// matching "coordinator and each shard have independent log streams".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogCommand<C> {
    /// Election term this command was proposed under.
    pub term: u64,
    /// Position of this command in the leader's log.
    pub index: u64,
    /// The state-machine command itself.
    pub command: C,
}
