//! In-memory state for one locking shard's slice of the UHS.
//!
//! A single `parking_lot::RwLock` guards `uhs`/`locked`/`spent`/
//! `prepared_dtxs`/`applied_dtxs`, matching the concurrency model's
//! requirement that writers take exclusive access during mutation while
//! unrelated dtx_ids may still read concurrently. `completed_txs` is
//! guarded by its own lock.

use crate::completed_cache::CompletedTxCache;
use parking_lot::RwLock;
use settlement_core::{
    error::Error, AuditResult, Ctx, Epoch, RangeProofVerifier, ShardRange, TxId, UhsElement,
    UhsId,
};
use std::collections::{HashMap, HashSet};

/// One CTX's locking outcome on this shard, retained until `discard_dtx`.
#[derive(Debug, Clone)]
struct PreparedItem {
    index: usize,
    ctx_id: TxId,
    /// Inputs this shard removed from `uhs` on behalf of this ctx.
    locked_inputs: Vec<(UhsId, UhsElement)>,
    /// Outputs whose prefix falls in this shard's range.
    local_outputs: Vec<settlement_core::CtxOutput>,
    /// Whether this shard successfully locked every relevant input.
    locked_ok: bool,
}

struct PreparedDtx {
    items: Vec<PreparedItem>,
    /// Result bitmap in slice order, returned verbatim on retry.
    bitmap: Vec<bool>,
}

struct Inner {
    uhs: HashMap<UhsId, UhsElement>,
    locked: HashMap<TxId, Vec<(UhsId, UhsElement)>>,
    spent: HashMap<UhsId, UhsElement>,
    prepared_dtxs: HashMap<TxId, PreparedDtx>,
    applied_dtxs: HashSet<TxId>,
    discarded_dtxs: HashSet<TxId>,
    epoch: Epoch,
}

/// One CTX as presented to a shard: its global batch index plus the data
/// the shard needs to decide whether it can lock its share of it.
pub struct ShardCtxItem<'a> {
    /// Index of this CTX within the dtx's overall batch.
    pub index: usize,
    /// The CTX itself.
    pub ctx: &'a Ctx,
}

/// A locking shard: owns the slice of the UHS addressed by `range`.
pub struct ShardState {
    range: ShardRange,
    inner: RwLock<Inner>,
    completed_txs: parking_lot::Mutex<CompletedTxCache>,
}

impl ShardState {
    /// Create an empty shard owning `range`, with a completed-tx cache of
    /// `cache_size` entries.
    pub fn new(range: ShardRange, cache_size: usize) -> Self {
        ShardState {
            range,
            inner: RwLock::new(Inner {
                uhs: HashMap::new(),
                locked: HashMap::new(),
                spent: HashMap::new(),
                prepared_dtxs: HashMap::new(),
                applied_dtxs: HashSet::new(),
                discarded_dtxs: HashSet::new(),
                epoch: 0,
            }),
            completed_txs: parking_lot::Mutex::new(CompletedTxCache::new(cache_size)),
        }
    }

    /// The shard range this instance owns.
    pub fn range(&self) -> ShardRange {
        self.range
    }

    /// Seed the shard with an unspent element (used for mint/genesis and
    /// in tests). Does not go through the lock/apply/discard protocol.
    pub fn seed_unspent(&self, id: UhsId, element: UhsElement) {
        let mut inner = self.inner.write();
        inner.uhs.insert(id, element);
    }

    /// `lock_outputs`: for each item in `slice`, attempt to lock the
    /// inputs that fall in this shard's range. Idempotent per `dtx_id`.
    pub fn lock_outputs(
        &self,
        dtx_id: TxId,
        slice: &[ShardCtxItem<'_>],
    ) -> Result<Vec<bool>, Error> {
        let mut inner = self.inner.write();

        if let Some(prepared) = inner.prepared_dtxs.get(&dtx_id) {
            return Ok(prepared.bitmap.clone());
        }

        let completed = self.completed_txs.lock();
        let mut items = Vec::with_capacity(slice.len());
        let mut bitmap = Vec::with_capacity(slice.len());

        for entry in slice {
            let ctx = entry.ctx;
            if completed.contains(&ctx.id) {
                // No replay: treat as not-locked on this shard.
                items.push(PreparedItem {
                    index: entry.index,
                    ctx_id: ctx.id,
                    locked_inputs: Vec::new(),
                    local_outputs: local_outputs(&self.range, ctx),
                    locked_ok: false,
                });
                bitmap.push(false);
                continue;
            }

            let relevant_inputs: Vec<UhsId> = ctx
                .inputs
                .iter()
                .copied()
                .filter(|id| self.range.contains(id))
                .collect();

            let all_present = relevant_inputs.iter().all(|id| inner.uhs.contains_key(id));

            if all_present {
                let mut locked_inputs = Vec::with_capacity(relevant_inputs.len());
                for id in &relevant_inputs {
                    let element = inner.uhs.remove(id).expect("checked present above");
                    locked_inputs.push((*id, element));
                }
                items.push(PreparedItem {
                    index: entry.index,
                    ctx_id: ctx.id,
                    locked_inputs,
                    local_outputs: local_outputs(&self.range, ctx),
                    locked_ok: true,
                });
                bitmap.push(true);
            } else {
                items.push(PreparedItem {
                    index: entry.index,
                    ctx_id: ctx.id,
                    locked_inputs: Vec::new(),
                    local_outputs: local_outputs(&self.range, ctx),
                    locked_ok: false,
                });
                bitmap.push(false);
            }
        }
        drop(completed);

        for item in &items {
            if item.locked_ok {
                inner
                    .locked
                    .entry(dtx_id)
                    .or_default()
                    .extend(item.locked_inputs.iter().cloned());
            }
        }

        inner.prepared_dtxs.insert(
            dtx_id,
            PreparedDtx {
                items,
                bitmap: bitmap.clone(),
            },
        );

        Ok(bitmap)
    }

    /// `apply_outputs`: pre: `lock_outputs` has been called for `dtx_id`.
    /// `global_complete` maps a batch index to the driver's merged
    /// complete-bit for that ctx (the AND across every participating
    /// shard). Idempotent via `applied_dtxs`.
    pub fn apply_outputs(
        &self,
        dtx_id: TxId,
        global_complete: &HashMap<usize, bool>,
    ) -> Result<(), Error> {
        let mut inner = self.inner.write();

        if inner.applied_dtxs.contains(&dtx_id) {
            return Ok(());
        }

        let prepared = inner.prepared_dtxs.get(&dtx_id).ok_or_else(|| {
            Error::ProtocolViolation(format!("apply_outputs without lock_outputs for {dtx_id:?}"))
        })?;

        let epoch = inner.epoch + 1;
        let mut newly_spent = Vec::new();
        let mut newly_unspent = Vec::new();
        let mut returned = Vec::new();
        let mut completed_ids = Vec::new();

        for item in &prepared.items {
            if !item.locked_ok {
                continue;
            }
            let complete = *global_complete.get(&item.index).unwrap_or(&false);
            if complete {
                for (id, mut element) in item.locked_inputs.clone() {
                    element.deletion_epoch = Some(epoch);
                    newly_spent.push((id, element));
                }
                for output in &item.local_outputs {
                    newly_unspent.push((
                        output.id,
                        UhsElement {
                            creation_epoch: epoch,
                            deletion_epoch: None,
                            value_commitment: output.value_commitment.clone(),
                            nested_hash: output.id.0,
                        },
                    ));
                }
                completed_ids.push(item.ctx_id);
            } else {
                returned.extend(item.locked_inputs.clone());
            }
        }

        for (id, element) in newly_spent {
            inner.spent.insert(id, element);
        }
        for (id, element) in newly_unspent {
            inner.uhs.insert(id, element);
        }
        for (id, element) in returned {
            inner.uhs.insert(id, element);
        }
        if !completed_ids.is_empty() {
            inner.epoch = epoch;
        }

        inner.locked.remove(&dtx_id);
        inner.applied_dtxs.insert(dtx_id);

        drop(inner);
        let mut completed = self.completed_txs.lock();
        for id in completed_ids {
            completed.insert(id);
        }

        Ok(())
    }

    /// `discard_dtx`: erase cached state for `dtx_id`. Must follow a
    /// completed `apply_outputs`; calling it first is a protocol violation.
    /// Idempotent via `discarded_dtxs`, so a driver retrying a partially
    /// failed fan-out can call this again once every shard has applied.
    pub fn discard_dtx(&self, dtx_id: TxId) -> Result<(), Error> {
        let mut inner = self.inner.write();
        if inner.discarded_dtxs.contains(&dtx_id) {
            return Ok(());
        }
        if !inner.applied_dtxs.contains(&dtx_id) {
            return Err(Error::ProtocolViolation(format!(
                "discard_dtx before apply_outputs for {dtx_id:?}"
            )));
        }
        inner.prepared_dtxs.remove(&dtx_id);
        inner.applied_dtxs.remove(&dtx_id);
        inner.locked.remove(&dtx_id);
        inner.discarded_dtxs.insert(dtx_id);
        Ok(())
    }

    /// Observational: is `id` currently unspent? Not transactional with
    /// any in-flight dtx.
    pub fn check_unspent(&self, id: &UhsId) -> bool {
        self.inner.read().uhs.contains_key(id)
    }

    /// Observational: has `id` been recorded as a recently completed CTX?
    pub fn check_tx_id(&self, id: &TxId) -> bool {
        self.completed_txs.lock().contains(id)
    }

    /// Current epoch (monotone, bumped on each apply that completes at
    /// least one ctx).
    pub fn epoch(&self) -> Epoch {
        self.inner.read().epoch
    }

    /// Audit: sum value commitments visible at `epoch`, verifying every
    /// element's identifier matches its nested hash.
    pub fn audit(&self, epoch: Epoch, verifier: &dyn RangeProofVerifier) -> AuditResult {
        let inner = self.inner.read();
        let mut commitments = Vec::new();

        for (id, element) in inner
            .uhs
            .iter()
            .chain(inner.spent.iter())
            .chain(inner.locked.values().flatten().map(|(id, el)| (id, el)))
        {
            if id.0 != element.nested_hash {
                return AuditResult::Mismatch { id: id.to_string() };
            }
            if element.visible_at(epoch) {
                commitments.push(element.value_commitment.clone());
            }
        }

        match verifier.verify_and_sum(&commitments) {
            Some(total) => AuditResult::Total(total),
            None => AuditResult::Mismatch {
                id: "range-proof batch verification failed".to_string(),
            },
        }
    }
}

fn local_outputs(range: &ShardRange, ctx: &Ctx) -> Vec<settlement_core::CtxOutput> {
    ctx.outputs
        .iter()
        .filter(|o| range.contains(&o.id))
        .cloned()
        .collect()
}
