//! The distributed-transaction driver: drives one dtx through
//! prepare -> commit -> discard across every shard it participates in.
//!
//! Each phase fans out to its shards with `std::thread::scope`, so the
//! calling thread blocks only as long as the slowest shard round-trip
//! instead of serializing one shard after another. `ShardClient` is the
//! seam a test double or a future networked client implements in place of
//! `LocalShardClient`.

use settlement_core::{Ctx, Dtx, Error, Phase, ShardRange, ShardRangeKey, TxId};
use settlement_storage::{ShardCtxItem, ShardState};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a driver needs from one participating shard. `LocalShardClient`
/// is the in-process implementation; a networked implementation built on
/// `settlement-wire`'s `ShardRequest`/`ShardResponse` lives in `settlement-api`.
pub trait ShardClient: Send + Sync {
    /// The range of UHS ids this shard owns.
    fn range(&self) -> ShardRange;
    /// See [`ShardState::lock_outputs`].
    fn lock_outputs(&self, dtx_id: TxId, slice: &[ShardCtxItem<'_>]) -> Result<Vec<bool>, Error>;
    /// See [`ShardState::apply_outputs`].
    fn apply_outputs(
        &self,
        dtx_id: TxId,
        global_complete: &HashMap<usize, bool>,
    ) -> Result<(), Error>;
    /// See [`ShardState::discard_dtx`].
    fn discard_dtx(&self, dtx_id: TxId) -> Result<(), Error>;
}

/// An in-process `ShardClient` wrapping a shard owned by this node.
pub struct LocalShardClient {
    shard: Arc<ShardState>,
}

impl LocalShardClient {
    /// Wrap `shard` for use by a driver.
    pub fn new(shard: Arc<ShardState>) -> Self {
        LocalShardClient { shard }
    }
}

impl ShardClient for LocalShardClient {
    fn range(&self) -> ShardRange {
        self.shard.range()
    }

    fn lock_outputs(&self, dtx_id: TxId, slice: &[ShardCtxItem<'_>]) -> Result<Vec<bool>, Error> {
        self.shard.lock_outputs(dtx_id, slice)
    }

    fn apply_outputs(
        &self,
        dtx_id: TxId,
        global_complete: &HashMap<usize, bool>,
    ) -> Result<(), Error> {
        self.shard.apply_outputs(dtx_id, global_complete)
    }

    fn discard_dtx(&self, dtx_id: TxId) -> Result<(), Error> {
        self.shard.discard_dtx(dtx_id)
    }
}

/// Hooks a driver invokes before each phase begins, so the caller can
/// durably record the phase's intent before it executes against shards. A
/// hook returning `Err` transitions the dtx to `Failed` without touching
/// any shard.
pub trait DriverHooks {
    /// Called before `prepare` invokes `lock_outputs` on any shard, with
    /// the dtx as constructed (its shard index already computed, its
    /// phase still `Start`).
    fn on_prepare(&mut self, dtx: &Dtx) -> Result<(), Error>;
    /// Called before `commit` invokes `apply_outputs` on any shard, once
    /// `complete[]` has been produced by `prepare`.
    fn on_commit(&mut self, dtx_id: TxId, complete: &[bool]) -> Result<(), Error>;
    /// Called before `discard` invokes `discard_dtx` on any shard.
    fn on_discard(&mut self, dtx_id: TxId) -> Result<(), Error>;
    /// Called once `discard` has succeeded on every shard.
    fn on_done(&mut self, dtx_id: TxId) -> Result<(), Error>;
}

/// Hooks that replicate nothing, for tests that exercise the shard fan-out
/// without a coordinator log.
#[derive(Default)]
pub struct NoopHooks;

impl DriverHooks for NoopHooks {
    fn on_prepare(&mut self, _dtx: &Dtx) -> Result<(), Error> {
        Ok(())
    }
    fn on_commit(&mut self, _dtx_id: TxId, _complete: &[bool]) -> Result<(), Error> {
        Ok(())
    }
    fn on_discard(&mut self, _dtx_id: TxId) -> Result<(), Error> {
        Ok(())
    }
    fn on_done(&mut self, _dtx_id: TxId) -> Result<(), Error> {
        Ok(())
    }
}

/// Drives one dtx through prepare, commit and discard across the shards it
/// participates in. `resuming` is set by the `recover_*` constructors: it
/// suppresses the first phase's hook (its intent was already replicated
/// before the crash that required recovery) without skipping the shard
/// round-trip itself, which is always safe to retry.
pub struct Driver {
    dtx: Dtx,
    shards: Vec<Arc<dyn ShardClient>>,
    resuming: bool,
}

impl Driver {
    /// Build a fresh driver in `Start` phase for a newly admitted batch.
    pub fn new(dtx_id: TxId, batch: Vec<Ctx>, shards: Vec<Arc<dyn ShardClient>>) -> Self {
        let ranges: Vec<ShardRange> = shards.iter().map(|s| s.range()).collect();
        let dtx = Dtx::new(dtx_id, batch, &ranges);
        Driver {
            dtx,
            shards,
            resuming: false,
        }
    }

    /// Resume a dtx recovered from the coordinator's `prepare_txs`: the
    /// batch was durably recorded but `lock_outputs` may or may not have
    /// run on any shard yet.
    pub fn recover_prepare(dtx: Dtx, shards: Vec<Arc<dyn ShardClient>>) -> Self {
        assert_eq!(
            dtx.phase,
            Phase::Prepare,
            "recover_prepare requires a dtx already in Prepare phase"
        );
        Driver {
            dtx,
            shards,
            resuming: true,
        }
    }

    /// Resume a dtx recovered from the coordinator's `commit_txs`:
    /// `complete[]` is already known; `apply_outputs` may or may not have
    /// run on any shard yet.
    pub fn recover_commit(dtx: Dtx, shards: Vec<Arc<dyn ShardClient>>) -> Self {
        assert_eq!(
            dtx.phase,
            Phase::Commit,
            "recover_commit requires a dtx already in Commit phase"
        );
        assert!(
            dtx.complete.is_some(),
            "recover_commit requires complete[] to already be recorded"
        );
        Driver {
            dtx,
            shards,
            resuming: true,
        }
    }

    /// Resume a dtx recovered from the coordinator's `discard_txs`:
    /// `discard_dtx` may or may not have run on any shard yet.
    pub fn recover_discard(dtx: Dtx, shards: Vec<Arc<dyn ShardClient>>) -> Self {
        assert_eq!(
            dtx.phase,
            Phase::Discard,
            "recover_discard requires a dtx already in Discard phase"
        );
        Driver {
            dtx,
            shards,
            resuming: true,
        }
    }

    /// Read-only access to the dtx this driver is advancing.
    pub fn dtx(&self) -> &Dtx {
        &self.dtx
    }

    /// `prepare`: fan `lock_outputs` out to every participating shard and
    /// merge their bitmaps into `complete[]`.
    pub fn prepare(&mut self, hooks: &mut dyn DriverHooks) -> Result<Vec<bool>, Error> {
        if !self.resuming {
            hooks.on_prepare(&self.dtx)?;
            self.dtx.phase = Phase::Prepare;
        }
        self.resuming = false;

        let dtx_id = self.dtx.dtx_id;
        let dtx = &self.dtx;
        let results: Vec<(ShardRangeKey, Result<Vec<bool>, Error>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .shards
                .iter()
                .map(|shard| {
                    let range = shard.range();
                    let key = ShardRangeKey::from(range);
                    let slice: Vec<ShardCtxItem<'_>> = dtx
                        .slice_for(range)
                        .iter()
                        .map(|&i| ShardCtxItem {
                            index: i,
                            ctx: &dtx.batch[i],
                        })
                        .collect();
                    scope.spawn(move || (key, shard.lock_outputs(dtx_id, &slice)))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("shard lock_outputs thread panicked"))
                .collect()
        });

        let mut per_index: HashMap<usize, bool> = HashMap::new();
        for (key, result) in results {
            match result {
                Ok(bitmap) => {
                    let indices = self.dtx.shard_index.get(&key).cloned().unwrap_or_default();
                    for (pos, idx) in indices.into_iter().enumerate() {
                        let bit = bitmap.get(pos).copied().unwrap_or(false);
                        let entry = per_index.entry(idx).or_insert(true);
                        *entry = *entry && bit;
                    }
                }
                Err(e) => {
                    self.dtx.phase = Phase::Failed;
                    return Err(e);
                }
            }
        }

        let complete: Vec<bool> = (0..self.dtx.batch.len())
            .map(|i| *per_index.get(&i).unwrap_or(&false))
            .collect();
        self.dtx.complete = Some(complete.clone());
        Ok(complete)
    }

    /// `commit`: fan `apply_outputs` out to every participating shard with
    /// its shard-local slice of `complete[]`.
    pub fn commit(&mut self, hooks: &mut dyn DriverHooks) -> Result<(), Error> {
        let complete = self
            .dtx
            .complete
            .clone()
            .expect("commit requires complete[] produced by prepare");

        if !self.resuming {
            hooks.on_commit(self.dtx.dtx_id, &complete)?;
            self.dtx.phase = Phase::Commit;
        }
        self.resuming = false;

        let dtx_id = self.dtx.dtx_id;
        let dtx = &self.dtx;
        let results: Vec<Result<(), Error>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .shards
                .iter()
                .map(|shard| {
                    let range = shard.range();
                    let local: HashMap<usize, bool> = dtx
                        .slice_for(range)
                        .iter()
                        .map(|&i| (i, complete[i]))
                        .collect();
                    scope.spawn(move || shard.apply_outputs(dtx_id, &local))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("shard apply_outputs thread panicked"))
                .collect()
        });

        for result in results {
            if let Err(e) = result {
                self.dtx.phase = Phase::Failed;
                return Err(e);
            }
        }
        Ok(())
    }

    /// `discard`: fan `discard_dtx` out to every participating shard.
    pub fn discard(&mut self, hooks: &mut dyn DriverHooks) -> Result<(), Error> {
        if !self.resuming {
            hooks.on_discard(self.dtx.dtx_id)?;
            self.dtx.phase = Phase::Discard;
        }
        self.resuming = false;

        let dtx_id = self.dtx.dtx_id;
        let results: Vec<Result<(), Error>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .shards
                .iter()
                .map(|shard| scope.spawn(move || shard.discard_dtx(dtx_id)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("shard discard_dtx thread panicked"))
                .collect()
        });

        for result in results {
            if let Err(e) = result {
                self.dtx.phase = Phase::Failed;
                return Err(e);
            }
        }
        self.dtx.phase = Phase::Done;
        hooks.on_done(self.dtx.dtx_id)?;
        Ok(())
    }

    /// Run every remaining phase starting from the driver's current phase,
    /// the one entry point both the fresh-batch path and the three
    /// recovery constructors use.
    pub fn run_to_completion(&mut self, hooks: &mut dyn DriverHooks) -> Result<(), Error> {
        match self.dtx.phase {
            Phase::Start | Phase::Prepare => {
                self.prepare(hooks)?;
                self.commit(hooks)?;
                self.discard(hooks)?;
            }
            Phase::Commit => {
                self.commit(hooks)?;
                self.discard(hooks)?;
            }
            Phase::Discard => {
                self.discard(hooks)?;
            }
            Phase::Done => {}
            Phase::Failed => {
                return Err(Error::Transient(
                    "driver constructed in Failed phase is not resumable".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlement_core::CtxOutput;
    use settlement_core::UhsId;
    use settlement_storage::ShardState;

    fn ctx(id: u8, inputs: Vec<u8>, outputs: Vec<u8>) -> Ctx {
        Ctx {
            id: TxId::new([id; 32]),
            inputs: inputs.into_iter().map(|b| UhsId::new([b; 32])).collect(),
            outputs: outputs
                .into_iter()
                .map(|b| CtxOutput {
                    id: UhsId::new([b; 32]),
                    value_commitment: vec![1],
                    range_proof: None,
                })
                .collect(),
            attestations: vec![],
        }
    }

    fn seeded_shard(range: ShardRange, seeds: &[u8]) -> Arc<ShardState> {
        let shard = Arc::new(ShardState::new(range, 16));
        for &b in seeds {
            let id = UhsId::new([b; 32]);
            shard.seed_unspent(
                id,
                settlement_core::UhsElement {
                    creation_epoch: 0,
                    deletion_epoch: None,
                    value_commitment: vec![100],
                    nested_hash: id.0,
                },
            );
        }
        shard
    }

    #[test]
    fn single_shard_mint_then_spend_commits_fully() {
        let shard = seeded_shard(ShardRange { low: 0x00, high: 0xff }, &[0xaa]);
        let client: Arc<dyn ShardClient> = Arc::new(LocalShardClient::new(shard.clone()));
        let spend = ctx(1, vec![0xaa], vec![0xbb]);

        let mut driver = Driver::new(TxId::random(), vec![spend], vec![client]);
        let mut hooks = NoopHooks;
        driver.run_to_completion(&mut hooks).unwrap();

        assert!(!shard.check_unspent(&UhsId::new([0xaa; 32])));
        assert!(shard.check_unspent(&UhsId::new([0xbb; 32])));
    }

    #[test]
    fn missing_input_yields_false_complete_and_no_mutation() {
        let shard = seeded_shard(ShardRange { low: 0x00, high: 0xff }, &[]);
        let client: Arc<dyn ShardClient> = Arc::new(LocalShardClient::new(shard.clone()));
        let spend = ctx(1, vec![0xaa], vec![0xbb]);

        let mut driver = Driver::new(TxId::random(), vec![spend], vec![client]);
        let mut hooks = NoopHooks;
        driver.run_to_completion(&mut hooks).unwrap();

        assert!(!shard.check_unspent(&UhsId::new([0xbb; 32])));
    }

    #[test]
    fn cross_shard_transfer_applies_on_both_shards() {
        let shard_a = seeded_shard(ShardRange { low: 0x00, high: 0x7f }, &[0x10]);
        let shard_b = seeded_shard(ShardRange { low: 0x80, high: 0xff }, &[]);
        let client_a: Arc<dyn ShardClient> = Arc::new(LocalShardClient::new(shard_a.clone()));
        let client_b: Arc<dyn ShardClient> = Arc::new(LocalShardClient::new(shard_b.clone()));
        let transfer = ctx(1, vec![0x10], vec![0x90]);

        let mut driver = Driver::new(TxId::random(), vec![transfer], vec![client_a, client_b]);
        let mut hooks = NoopHooks;
        driver.run_to_completion(&mut hooks).unwrap();

        assert!(!shard_a.check_unspent(&UhsId::new([0x10; 32])));
        assert!(shard_b.check_unspent(&UhsId::new([0x90; 32])));
    }

    #[test]
    fn recover_commit_reapplies_idempotently() {
        let shard = seeded_shard(ShardRange { low: 0x00, high: 0xff }, &[0xaa]);
        let client: Arc<dyn ShardClient> = Arc::new(LocalShardClient::new(shard.clone()));
        let spend = ctx(1, vec![0xaa], vec![0xbb]);
        let dtx_id = TxId::random();

        let mut driver = Driver::new(dtx_id, vec![spend], vec![client.clone()]);
        let mut hooks = NoopHooks;
        let complete = driver.prepare(&mut hooks).unwrap();

        let mut recovered_dtx = driver.dtx().clone();
        recovered_dtx.phase = Phase::Commit;
        recovered_dtx.complete = Some(complete);

        let mut recovered = Driver::recover_commit(recovered_dtx, vec![client]);
        recovered.run_to_completion(&mut hooks).unwrap();

        assert!(shard.check_unspent(&UhsId::new([0xbb; 32])));
        // A second apply_outputs for the same dtx_id must not double-apply.
        assert!(shard.check_tx_id(&TxId::new([1; 32])));
    }
}
