//! The coordinator controller: admits CTXs, batches them, dispatches
//! drivers, and persists phase transitions through its replicated log.
//!
//! One `parking_lot::Mutex` guards the current batch and the pending-reply
//! list together, matching the concurrency model's "one mutex guards the
//! current batch and the pending-response map"; a `Condvar` wakes the
//! batch-cutting executor when the batch is non-empty, and a second
//! `Condvar` wakes blocked admissions once the window frees.

use crate::driver::{Driver, DriverHooks, ShardClient};
use crate::dtx_state_machine::{CoordinatorState, DtxCommand};
use parking_lot::{Condvar, Mutex};
use settlement_core::{AdmissionError, Attestation, Ctx, Dtx, Error, SentinelKey, TxId};
use settlement_durability::{DurabilityMode, ReplicatedLog, WalError};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Outcome delivered to an admitted CTX's caller once its dtx finishes (or
/// a future leader must finish it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtxOutcome {
    /// Every shard touching this CTX's inputs/outputs applied it.
    Completed,
    /// At least one shard failed to lock an input; the dtx rolled it back.
    Aborted,
    /// The driver failed transiently; a future leader will finish the dtx.
    /// The caller may retry admission or consult the watchtower path.
    Unknown,
}

/// Invoked once with the final outcome for one admitted CTX.
pub type ReplyFn = Box<dyn FnOnce(CtxOutcome) + Send + 'static>;

/// Verifies one attestation's signature over a CTX id; the cryptographic
/// collaborator this core only calls through.
pub type VerifyFn = Box<dyn Fn(&Attestation, &TxId) -> bool + Send + Sync>;

struct PendingCtx {
    ctx: Ctx,
    reply: ReplyFn,
}

#[derive(Default)]
struct CurrentBatch {
    pending: Vec<PendingCtx>,
}

/// Admission and batching tunables; names match `spec.md` §6's
/// configuration keys.
pub struct CoordinatorConfig {
    /// Max CTXs per dtx before the batch is cut.
    pub batch_size: usize,
    /// Max in-flight CTXs (admitted but not yet replied to).
    pub window_size: usize,
    /// Minimum valid sentinel attestations required for admission.
    pub attestation_threshold: usize,
    /// Admissible attestation public keys.
    pub sentinel_keys: HashSet<SentinelKey>,
}

/// Admits CTXs, batches them, and drives distributed commits across
/// `shards`, persisting every phase transition through a replicated log
/// before it executes externally.
pub struct CoordinatorController {
    config: CoordinatorConfig,
    verify: VerifyFn,
    shards: Vec<Arc<dyn ShardClient>>,
    log: Mutex<ReplicatedLog<CoordinatorState>>,
    batch: Mutex<CurrentBatch>,
    batch_ready: Condvar,
    window_free: Condvar,
    in_flight: Mutex<usize>,
}

impl CoordinatorController {
    /// Open (or create) the coordinator's replicated log at `path` and
    /// build a controller in `Follower` role. Call `become_leader` or
    /// `recover` before admitting anything.
    pub fn open(
        path: &Path,
        mode: DurabilityMode,
        config: CoordinatorConfig,
        verify: VerifyFn,
        shards: Vec<Arc<dyn ShardClient>>,
    ) -> Result<Self, WalError> {
        let log = ReplicatedLog::open(path, mode)?;
        Ok(CoordinatorController {
            config,
            verify,
            shards,
            log: Mutex::new(log),
            batch: Mutex::new(CurrentBatch::default()),
            batch_ready: Condvar::new(),
            window_free: Condvar::new(),
            in_flight: Mutex::new(0),
        })
    }

    /// Step down: refuse `propose` until `recover` is called again. The
    /// caller is responsible for also tearing down admissions, the
    /// executor pool and the listening endpoint, serialized through a
    /// single control thread per the concurrency model.
    pub fn step_down(&self, leader_hint: Option<u64>) {
        self.log.lock().become_follower(leader_hint);
    }

    /// Admit `ctx`, rejecting it synchronously on a bad attestation,
    /// structural violation, or duplicate id in the current batch.
    /// Blocks on the window-size condvar if the coordinator already has
    /// `window_size` CTXs in flight.
    pub fn admit(&self, ctx: Ctx, reply: ReplyFn) -> Result<(), AdmissionError> {
        ctx.validate()?;
        let verify = &self.verify;
        ctx.check_attestations(&self.config.sentinel_keys, self.config.attestation_threshold, |a, id| {
            verify(a, id)
        })?;

        {
            let mut in_flight = self.in_flight.lock();
            while *in_flight >= self.config.window_size {
                self.window_free.wait(&mut in_flight);
            }
            *in_flight += 1;
        }

        let became_full = {
            let mut batch = self.batch.lock();
            if batch.pending.iter().any(|p| p.ctx.id == ctx.id) {
                drop(batch);
                let mut in_flight = self.in_flight.lock();
                *in_flight = in_flight.saturating_sub(1);
                drop(in_flight);
                self.window_free.notify_one();
                return Err(AdmissionError::DuplicateInBatch);
            }
            batch.pending.push(PendingCtx { ctx, reply });
            batch.pending.len() >= self.config.batch_size
        };
        if became_full {
            self.batch_ready.notify_one();
        } else {
            // Wake the executor even for a partial batch: it decides
            // whether idle-triggering applies.
            self.batch_ready.notify_one();
        }
        Ok(())
    }

    /// Consume the current batch if it is non-empty (waiting up to
    /// `wait_timeout` for one to appear), run its driver to completion,
    /// and dispatch replies. Returns `true` if a batch was run. Intended
    /// to be called in a loop by an executor-pool worker thread.
    pub fn run_batch_cycle(&self, wait_timeout: Duration) -> bool {
        let pending = {
            let mut batch = self.batch.lock();
            if batch.pending.is_empty() {
                let timed_out = self.batch_ready.wait_for(&mut batch, wait_timeout).timed_out();
                if timed_out || batch.pending.is_empty() {
                    return false;
                }
            }
            std::mem::take(&mut batch.pending)
        };

        let n = pending.len();
        let mut ctxs = Vec::with_capacity(n);
        let mut replies = Vec::with_capacity(n);
        for p in pending {
            ctxs.push(p.ctx);
            replies.push(p.reply);
        }

        let dtx_id = TxId::random();
        let mut driver = Driver::new(dtx_id, ctxs, self.shards.clone());
        let mut hooks = ReplicatingHooks { log: &self.log };
        let outcome = driver.run_to_completion(&mut hooks);
        let complete = driver.dtx().complete.clone();

        match outcome {
            Ok(()) => {
                let complete = complete.unwrap_or_else(|| vec![false; n]);
                for (reply, completed) in replies.into_iter().zip(complete) {
                    reply(if completed {
                        CtxOutcome::Completed
                    } else {
                        CtxOutcome::Aborted
                    });
                }
            }
            Err(e) => {
                tracing::warn!(?dtx_id, error = %e, "driver failed; a future leader will finish this dtx");
                for reply in replies {
                    reply(CtxOutcome::Unknown);
                }
            }
        }

        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(n);
        drop(in_flight);
        self.window_free.notify_all();
        true
    }

    /// Become leader for `term`, replaying the log, and return a driver
    /// for every dtx left in flight by the previous leader, resumed at the
    /// correct phase. The caller must run every returned driver to
    /// completion (via [`Self::run_recovered`]) before admitting anything.
    pub fn recover(&self, term: u64) -> Result<Vec<Driver>, WalError> {
        let mut log = self.log.lock();
        log.become_leader(term)?;
        let snapshot = log.state().get();
        drop(log);

        let mut drivers = Vec::new();
        for (_, dtx) in snapshot.prepare_txs {
            drivers.push(Driver::recover_prepare(dtx, self.shards.clone()));
        }
        for (_, dtx) in snapshot.commit_txs {
            drivers.push(Driver::recover_commit(dtx, self.shards.clone()));
        }
        for (_, dtx) in snapshot.discard_txs {
            drivers.push(Driver::recover_discard(dtx, self.shards.clone()));
        }
        Ok(drivers)
    }

    /// Run one driver returned by [`Self::recover`] to completion, logging
    /// (but not panicking on) a transient failure: that dtx simply waits
    /// for the next leader.
    pub fn run_recovered(&self, mut driver: Driver) -> Result<(), Error> {
        let dtx_id = driver.dtx().dtx_id;
        let mut hooks = ReplicatingHooks { log: &self.log };
        let result = driver.run_to_completion(&mut hooks);
        if let Err(e) = &result {
            tracing::warn!(?dtx_id, error = %e, "recovery driver failed; will retry on next leader election");
        }
        result
    }
}

/// `DriverHooks` that replicate each phase's intent to the coordinator's
/// log before it executes against shards.
struct ReplicatingHooks<'a> {
    log: &'a Mutex<ReplicatedLog<CoordinatorState>>,
}

impl DriverHooks for ReplicatingHooks<'_> {
    fn on_prepare(&mut self, dtx: &Dtx) -> Result<(), Error> {
        self.log
            .lock()
            .propose(DtxCommand::Prepare {
                dtx_id: dtx.dtx_id,
                dtx: dtx.clone(),
            })
            .map(|_| ())
            .map_err(|e| Error::Transient(e.to_string()))
    }

    fn on_commit(&mut self, dtx_id: TxId, complete: &[bool]) -> Result<(), Error> {
        self.log
            .lock()
            .propose(DtxCommand::Commit {
                dtx_id,
                complete: complete.to_vec(),
            })
            .map(|_| ())
            .map_err(|e| Error::Transient(e.to_string()))
    }

    fn on_discard(&mut self, dtx_id: TxId) -> Result<(), Error> {
        self.log
            .lock()
            .propose(DtxCommand::Discard { dtx_id })
            .map(|_| ())
            .map_err(|e| Error::Transient(e.to_string()))
    }

    fn on_done(&mut self, dtx_id: TxId) -> Result<(), Error> {
        self.log
            .lock()
            .propose(DtxCommand::Done { dtx_id })
            .map(|_| ())
            .map_err(|e| Error::Transient(e.to_string()))
    }
}
