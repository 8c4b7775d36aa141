//! The coordinator's replicated state machine: the durable record of every
//! in-flight dtx's phase, used by a newly elected leader to resume
//! interrupted distributed commits.
//!
//! Invariant: a dtx_id lives in at most one of `prepare_txs`, `commit_txs`,
//! `discard_txs` at any instant. Every transition below either moves a dtx
//! between those maps or removes it; anything else observed on replay is a
//! protocol violation and, per the error-handling design, a bug the node
//! refuses to paper over.

use settlement_core::{Dtx, Phase, ShardRangeKey, TxId};
use serde::{Deserialize, Serialize};
use settlement_durability::StateMachine;
use std::collections::{BTreeMap, HashMap};

/// One command appended to the coordinator's replicated log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DtxCommand {
    /// Record that `dtx_id`'s batch is about to be prepared.
    Prepare {
        /// The dtx's durable identity.
        dtx_id: TxId,
        /// The dtx, already carrying its computed shard index.
        dtx: Dtx,
    },
    /// Record that `dtx_id` locked `complete[]` and is about to commit.
    Commit {
        /// The dtx to move from `prepare_txs` to `commit_txs`.
        dtx_id: TxId,
        /// The merged per-ctx lock outcome produced by prepare.
        complete: Vec<bool>,
    },
    /// Record that `dtx_id` applied its outputs and is about to discard.
    Discard {
        /// The dtx to move from `commit_txs` to `discard_txs`.
        dtx_id: TxId,
    },
    /// Record that `dtx_id` has discarded on every shard and can be
    /// forgotten.
    Done {
        /// The dtx to remove from `discard_txs`.
        dtx_id: TxId,
    },
    /// No-op command used only to request a snapshot via `apply`'s return
    /// value; never appended to the log by `propose` in normal operation.
    Get,
}

/// Read-only snapshot of the coordinator's replicated state, returned by
/// `DtxCommand::Get` for a newly elected leader's recovery pass.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Dtxs whose batch has been durably recorded but not yet locked.
    pub prepare_txs: HashMap<TxId, Dtx>,
    /// Dtxs whose `complete[]` has been durably recorded but not yet applied.
    pub commit_txs: HashMap<TxId, Dtx>,
    /// Dtxs that have applied but not yet discarded on every shard.
    pub discard_txs: HashMap<TxId, Dtx>,
}

/// Result of applying one [`DtxCommand`]. `Get` is the only variant the
/// recovery path reads; the others exist so `propose`'s caller can confirm
/// the write landed without holding a separate reference to the state.
#[derive(Debug, Clone)]
pub enum Applied {
    /// The mutating commands all return this.
    Ack,
    /// `Get`'s answer.
    Snapshot(Snapshot),
}

/// The coordinator's durable dtx bookkeeping: a dtx_id lives in at most one
/// of the three maps at any time.
#[derive(Default)]
pub struct CoordinatorState {
    prepare_txs: HashMap<TxId, Dtx>,
    commit_txs: HashMap<TxId, Dtx>,
    discard_txs: HashMap<TxId, Dtx>,
}

impl CoordinatorState {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            prepare_txs: self.prepare_txs.clone(),
            commit_txs: self.commit_txs.clone(),
            discard_txs: self.discard_txs.clone(),
        }
    }

    /// `get()`: the snapshot a newly elected leader's recovery pass reads.
    /// Unlike the other four commands this never goes through `propose` —
    /// a read has nothing to make durable — so a leader calls this
    /// directly against `ReplicatedLog::state()` after `become_leader`.
    pub fn get(&self) -> Snapshot {
        self.snapshot()
    }
}

impl StateMachine for CoordinatorState {
    type Command = DtxCommand;
    type Applied = Applied;

    fn apply(&mut self, command: &DtxCommand) -> Applied {
        match command {
            DtxCommand::Prepare { dtx_id, dtx } => {
                if self.prepare_txs.contains_key(dtx_id)
                    || self.commit_txs.contains_key(dtx_id)
                    || self.discard_txs.contains_key(dtx_id)
                {
                    tracing::error!(?dtx_id, "duplicate prepare for dtx already tracked");
                    panic!("protocol violation: duplicate prepare for {dtx_id:?}");
                }
                let mut dtx = dtx.clone();
                dtx.phase = Phase::Prepare;
                self.prepare_txs.insert(*dtx_id, dtx);
                Applied::Ack
            }
            DtxCommand::Commit { dtx_id, complete } => {
                let Some(mut dtx) = self.prepare_txs.remove(dtx_id) else {
                    tracing::error!(?dtx_id, "commit without a matching prepare");
                    panic!("protocol violation: commit without prepare for {dtx_id:?}");
                };
                dtx.phase = Phase::Commit;
                dtx.complete = Some(complete.clone());
                self.commit_txs.insert(*dtx_id, dtx);
                Applied::Ack
            }
            DtxCommand::Discard { dtx_id } => {
                let Some(mut dtx) = self.commit_txs.remove(dtx_id) else {
                    tracing::error!(?dtx_id, "discard without a matching commit");
                    panic!("protocol violation: discard without commit for {dtx_id:?}");
                };
                dtx.phase = Phase::Discard;
                self.discard_txs.insert(*dtx_id, dtx);
                Applied::Ack
            }
            DtxCommand::Done { dtx_id } => {
                if self.discard_txs.remove(dtx_id).is_none() {
                    tracing::error!(?dtx_id, "done without a matching discard");
                    panic!("protocol violation: done without discard for {dtx_id:?}");
                }
                Applied::Ack
            }
            DtxCommand::Get => Applied::Snapshot(self.snapshot()),
        }
    }
}

/// The shard index type `Dtx` carries, re-exported here so callers building
/// a `Dtx` for `DtxCommand::Prepare` don't need a second import path.
pub type ShardIndex = BTreeMap<ShardRangeKey, Vec<usize>>;

#[cfg(test)]
mod tests {
    use super::*;
    use settlement_core::{Ctx, ShardRange};

    fn dtx(id: [u8; 32]) -> Dtx {
        let ctx = Ctx {
            id: TxId::new(id),
            inputs: vec![],
            outputs: vec![],
            attestations: vec![],
        };
        Dtx::new(
            TxId::new(id),
            vec![ctx],
            &[ShardRange { low: 0x00, high: 0xff }],
        )
    }

    #[test]
    fn prepare_then_commit_then_discard_then_done_moves_through_maps() {
        let mut state = CoordinatorState::default();
        let dtx_id = TxId::new([1; 32]);

        state.apply(&DtxCommand::Prepare {
            dtx_id,
            dtx: dtx([1; 32]),
        });
        assert!(state.prepare_txs.contains_key(&dtx_id));

        state.apply(&DtxCommand::Commit {
            dtx_id,
            complete: vec![true],
        });
        assert!(!state.prepare_txs.contains_key(&dtx_id));
        assert!(state.commit_txs.contains_key(&dtx_id));

        state.apply(&DtxCommand::Discard { dtx_id });
        assert!(!state.commit_txs.contains_key(&dtx_id));
        assert!(state.discard_txs.contains_key(&dtx_id));

        state.apply(&DtxCommand::Done { dtx_id });
        assert!(!state.discard_txs.contains_key(&dtx_id));
    }

    #[test]
    #[should_panic(expected = "duplicate prepare")]
    fn duplicate_prepare_is_fatal() {
        let mut state = CoordinatorState::default();
        let dtx_id = TxId::new([2; 32]);
        state.apply(&DtxCommand::Prepare {
            dtx_id,
            dtx: dtx([2; 32]),
        });
        state.apply(&DtxCommand::Prepare {
            dtx_id,
            dtx: dtx([2; 32]),
        });
    }

    #[test]
    #[should_panic(expected = "commit without prepare")]
    fn commit_without_prepare_is_fatal() {
        let mut state = CoordinatorState::default();
        state.apply(&DtxCommand::Commit {
            dtx_id: TxId::new([3; 32]),
            complete: vec![],
        });
    }

    #[test]
    fn get_returns_current_snapshot() {
        let mut state = CoordinatorState::default();
        let dtx_id = TxId::new([4; 32]);
        state.apply(&DtxCommand::Prepare {
            dtx_id,
            dtx: dtx([4; 32]),
        });
        match state.apply(&DtxCommand::Get) {
            Applied::Snapshot(snap) => {
                assert!(snap.prepare_txs.contains_key(&dtx_id));
                assert!(snap.commit_txs.is_empty());
                assert!(snap.discard_txs.is_empty());
            }
            Applied::Ack => panic!("expected snapshot"),
        }
    }
}
