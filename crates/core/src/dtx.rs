//! Distributed transaction (dtx): an atomic batch of CTXs processed by the
//! coordinator across shards via three-phase commit.

use crate::ctx::Ctx;
use crate::types::{ShardRange, TxId, UhsId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Phase a dtx progresses through. Monotone except for the recoverable
/// `Failed` state, which a future leader resumes from the last durable
/// phase rather than from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Freshly constructed, no shard has been contacted yet.
    Start,
    /// `lock_outputs` has been invoked on participating shards.
    Prepare,
    /// `apply_outputs` has been invoked on participating shards.
    Commit,
    /// `discard_dtx` has been invoked on participating shards.
    Discard,
    /// All phases completed; safe to forget.
    Done,
    /// A phase failed transiently; a future leader retries from the last
    /// durable phase recorded in the coordinator's replicated state.
    Failed,
}

/// An atomic batch of CTXs plus the bookkeeping needed to drive it through
/// prepare/commit/discard across the shards it touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dtx {
    /// Fresh random identifier assigned by the coordinator.
    pub dtx_id: TxId,
    /// Ordered list of CTXs in this batch.
    pub batch: Vec<Ctx>,
    /// Current phase.
    pub phase: Phase,
    /// For each participating shard (keyed by its range), the sorted list
    /// of indices in `batch` whose inputs or outputs fall in that range.
    pub shard_index: BTreeMap<ShardRangeKey, Vec<usize>>,
    /// After prepare: true at index `i` iff every participating shard
    /// locked every input of `batch[i]`. Immutable once produced.
    pub complete: Option<Vec<bool>>,
}

/// `ShardRange` does not implement `Ord`; this newtype gives the coordinator
/// a deterministic key to index participating shards by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardRangeKey(pub u8, pub u8);

impl From<ShardRange> for ShardRangeKey {
    fn from(r: ShardRange) -> Self {
        ShardRangeKey(r.low, r.high)
    }
}

impl Dtx {
    /// Build a fresh dtx in `Start` phase, computing the participating
    /// shard set as the union of shards touching any input or output id in
    /// any CTX of `batch`.
    pub fn new(dtx_id: TxId, batch: Vec<Ctx>, shard_ranges: &[ShardRange]) -> Self {
        let mut shard_index: BTreeMap<ShardRangeKey, Vec<usize>> = BTreeMap::new();
        for (i, ctx) in batch.iter().enumerate() {
            let touches = |id: &UhsId, range: &ShardRange| range.contains(id);
            for range in shard_ranges {
                let hit = ctx.inputs.iter().any(|id| touches(id, range))
                    || ctx.outputs.iter().any(|o| touches(&o.id, range));
                if hit {
                    shard_index.entry((*range).into()).or_default().push(i);
                }
            }
        }
        Dtx {
            dtx_id,
            batch,
            phase: Phase::Start,
            shard_index,
            complete: None,
        }
    }

    /// The slice of `batch` indices that shard `range` participates in.
    pub fn slice_for(&self, range: ShardRange) -> &[usize] {
        self.shard_index
            .get(&range.into())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All participating shard ranges, in deterministic order.
    pub fn participating_ranges(&self) -> impl Iterator<Item = ShardRangeKey> + '_ {
        self.shard_index.keys().copied()
    }
}
