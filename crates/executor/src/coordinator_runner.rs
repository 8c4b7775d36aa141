//! Drives one [`CoordinatorController`] through leader recovery and then a
//! steady-state pool of batch-cycle workers.
//!
//! Recovery fans out across the executor pool (one task per in-flight
//! dtx); only once every recovered driver has finished does the runner
//! start the batch-cycle workers that serve new admissions, matching
//! "only after recovery completes does the leader start accepting new
//! admissions".

use crate::pool::ExecutorPool;
use settlement_durability::WalError;
use settlement_engine::CoordinatorController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Owns the steady-state worker threads for one coordinator leadership
/// term. Dropping without calling [`Self::stop`] leaks the threads; they
/// are joined explicitly so shutdown ordering stays visible to the caller.
pub struct CoordinatorRunner {
    controller: Arc<CoordinatorController>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl CoordinatorRunner {
    /// Become leader for `term`, run every recovered driver to completion
    /// on a temporary pool, then start `num_batch_workers` threads each
    /// looping [`CoordinatorController::run_batch_cycle`].
    pub fn start(
        controller: Arc<CoordinatorController>,
        term: u64,
        num_batch_workers: usize,
    ) -> Result<Self, WalError> {
        let drivers = controller.recover(term)?;
        if !drivers.is_empty() {
            let recovery_pool = ExecutorPool::new(num_batch_workers.max(1));
            for driver in drivers {
                let controller = Arc::clone(&controller);
                recovery_pool.submit(move || {
                    if let Err(e) = controller.run_recovered(driver) {
                        tracing::warn!(error = %e, "recovered driver did not finish; will retry on next leader election");
                    }
                });
            }
            recovery_pool.shutdown();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(num_batch_workers);
        for i in 0..num_batch_workers {
            let controller = Arc::clone(&controller);
            let stop = Arc::clone(&stop);
            let handle = std::thread::Builder::new()
                .name(format!("settlement-coordinator-{i}"))
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        controller.run_batch_cycle(Duration::from_millis(200));
                    }
                })
                .expect("failed to spawn coordinator batch worker");
            workers.push(handle);
        }

        Ok(CoordinatorRunner {
            controller,
            stop,
            workers,
        })
    }

    /// Step the coordinator down to follower and join every batch worker.
    /// Tears down admissions implicitly: `step_down` makes `propose` (and
    /// therefore every phase hook) fail, so in-flight cycles finish by
    /// surfacing `Unknown` to their callers rather than hanging.
    pub fn stop(mut self, leader_hint: Option<u64>) {
        self.controller.step_down(leader_hint);
        self.stop.store(true, Ordering::Release);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlement_core::{Ctx, CtxOutput, ShardRange, TxId, UhsId};
    use settlement_durability::DurabilityMode;
    use settlement_engine::{CoordinatorConfig, CtxOutcome, LocalShardClient};
    use settlement_storage::ShardState;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use tempfile::tempdir;

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

    #[test]
    fn batch_worker_completes_an_admitted_ctx() {
        let dir = tempdir().unwrap();
        let shard = Arc::new(ShardState::new(ShardRange { low: 0x00, high: 0xff }, 16));
        let shards: Vec<Arc<dyn settlement_engine::ShardClient>> =
            vec![Arc::new(LocalShardClient::new(shard))];
        let config = CoordinatorConfig {
            batch_size: 1,
            window_size: 4,
            attestation_threshold: 0,
            sentinel_keys: HashSet::new(),
        };
        let controller = Arc::new(
            CoordinatorController::open(
                &dir.path().join("coordinator.log"),
                DurabilityMode::Always,
                config,
                Box::new(|_, _| true),
                shards,
            )
            .unwrap(),
        );

        let runner = CoordinatorRunner::start(Arc::clone(&controller), 1, 2).unwrap();

        let (tx, rx) = mpsc::channel();
        controller
            .admit(ctx(1, vec![], vec![0xaa]), Box::new(move |o| tx.send(o).unwrap()))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), CtxOutcome::Completed);

        runner.stop(None);
    }
}
