//! A generic replicated log backing both the coordinator's state machine
//! and the runtime locking shard's state machine.
//!
//! `ReplicatedLog<S>` owns one segment file and a `LogRole`. `propose` is
//! only callable while `Leader`: it appends the command, replays it
//! through the caller-supplied [`StateMachine`], fsyncs per the configured
//! [`DurabilityMode`], and returns the applied result. This is the
//! synchronous-replicate suspension point on the hot path of every command
//! that touches durable state.
//!
//! Leader election itself — the distributed protocol that decides who
//! becomes leader — is an external collaborator, just like sentinels and
//! archivers are to the settlement core. This crate exposes
//! `become_leader`/`become_follower` as the hooks that collaborator calls,
//! plus [`StaticElection`](crate::election::StaticElection) as a test
//! double for single-node operation.

use crate::error::{Result, WalError};
use crate::format::Segment;
use crate::mode::DurabilityMode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

/// A node's position with respect to a replicated log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRole {
    /// This node may `propose` new commands, for the given term.
    Leader {
        /// Election term this leadership claim is valid for.
        term: u64,
    },
    /// This node may only replay; `propose` is refused. `leader_hint`
    /// names the node this follower believes is current leader, if known.
    Follower {
        /// Best-known current leader, if any.
        leader_hint: Option<u64>,
    },
}

/// A deterministic state machine a [`ReplicatedLog`] replays commands
/// through. One instance per log: the coordinator's dtx state machine and
/// the runtime locking shard's ticket/key state machine each implement
/// this independently.
pub trait StateMachine: Default {
    /// The command type appended to the log.
    type Command: Serialize + DeserializeOwned + Clone;
    /// What `apply` returns to the proposer.
    type Applied;

    /// Apply one command, mutating state and returning the result the
    /// original caller of `propose` is waiting on.
    fn apply(&mut self, command: &Self::Command) -> Self::Applied;
}

/// An append-only, leader-elected log generic over a [`StateMachine`].
pub struct ReplicatedLog<S: StateMachine> {
    segment: Segment,
    mode: DurabilityMode,
    role: LogRole,
    state: S,
    writes_since_sync: usize,
    last_sync: Instant,
}

impl<S: StateMachine> ReplicatedLog<S> {
    /// Open or create the log segment at `path`, replaying any existing
    /// records into a fresh state machine before returning. The log
    /// starts in `Follower { leader_hint: None }`; call `become_leader`
    /// to accept proposals.
    pub fn open(path: &Path, mode: DurabilityMode) -> Result<Self> {
        let mut segment = Segment::open_or_create(path)?;
        let (records, stop_reason, stop_offset) = segment.read_all()?;
        if !matches!(stop_reason, crate::format::StopReason::Eof) {
            tracing::warn!(
                ?stop_reason,
                offset = stop_offset,
                "replicated log segment ended early, truncating to last valid record"
            );
            segment.truncate_at(stop_offset)?;
        }

        let mut state = S::default();
        for record in &records {
            let command: S::Command = rmp_serde::from_slice(record)
                .map_err(|e| WalError::Codec(e.to_string()))?;
            state.apply(&command);
        }

        Ok(ReplicatedLog {
            segment,
            mode,
            role: LogRole::Follower { leader_hint: None },
            state,
            writes_since_sync: 0,
            last_sync: Instant::now(),
        })
    }

    /// Current role.
    pub fn role(&self) -> LogRole {
        self.role
    }

    /// Read-only access to the replayed state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Replay the full log into a fresh state machine and become leader
    /// for `term`. Used both at startup and when an external election
    /// component promotes this node.
    pub fn become_leader(&mut self, term: u64) -> Result<()> {
        let (records, stop_reason, stop_offset) = self.segment.read_all()?;
        if !matches!(stop_reason, crate::format::StopReason::Eof) {
            self.segment.truncate_at(stop_offset)?;
        }
        let mut state = S::default();
        for record in &records {
            let command: S::Command =
                rmp_serde::from_slice(record).map_err(|e| WalError::Codec(e.to_string()))?;
            state.apply(&command);
        }
        self.state = state;
        self.role = LogRole::Leader { term };
        tracing::info!(term, "replicated log became leader");
        Ok(())
    }

    /// Step down; `propose` is refused until `become_leader` is called
    /// again.
    pub fn become_follower(&mut self, leader_hint: Option<u64>) {
        tracing::info!(?leader_hint, "replicated log became follower");
        self.role = LogRole::Follower { leader_hint };
    }

    /// Append `command`, apply it to the state machine, fsync per the
    /// configured durability mode, and return the applied result.
    ///
    /// Only callable while `Leader`; returns [`WalError::NotLeader`]
    /// otherwise without mutating anything.
    pub fn propose(&mut self, command: S::Command) -> Result<S::Applied> {
        if !matches!(self.role, LogRole::Leader { .. }) {
            return Err(WalError::NotLeader);
        }

        let bytes = rmp_serde::to_vec(&command).map_err(|e| WalError::Codec(e.to_string()))?;
        self.segment.append(&bytes)?;
        self.writes_since_sync += 1;
        self.maybe_sync()?;

        Ok(self.state.apply(&command))
    }

    fn maybe_sync(&mut self) -> Result<()> {
        let should_sync = match self.mode {
            DurabilityMode::Cache => false,
            DurabilityMode::Always => true,
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => {
                self.writes_since_sync >= batch_size
                    || self.last_sync.elapsed().as_millis() as u64 >= interval_ms
            }
        };
        if should_sync {
            self.segment.sync()?;
            self.writes_since_sync = 0;
            self.last_sync = Instant::now();
        }
        Ok(())
    }

    /// Force an fsync regardless of durability mode, e.g. before a clean
    /// shutdown.
    pub fn flush(&mut self) -> Result<()> {
        self.segment.sync()?;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Number of bytes written to the active segment so far.
    pub fn segment_size(&self) -> u64 {
        self.segment.size()
    }
}
