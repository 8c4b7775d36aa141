//! [`Handler`] implementations for each RPC surface named in the external
//! interfaces. `ShardHandler` is a plain synchronous wrapper with no log
//! underneath it; `RuntimeLockingShardHandler` and `SentinelHandler` are
//! the "log-backed server" variant — the call underneath already routes
//! through a [`settlement_engine`] controller's own `ReplicatedLog`, so
//! the handler here only translates wire payloads and lets that call
//! block (or, for admission, register a callback) as it would in process.

use crate::server::{Handler, Reply};
use settlement_core::{Error, LockError};
use settlement_engine::{CoordinatorController, CtxOutcome, RuntimeLockingShardController};
use settlement_storage::{ShardCtxItem, ShardState};
use settlement_wire::{
    AdmissionRequest, AdmissionResponse, ApiError, BrokerRequest, BrokerResponse, ShardRequest,
    ShardResponse,
};
use std::sync::Arc;

fn core_error(error: Error) -> ApiError {
    let code = match &error {
        Error::Io(_) => "Io",
        Error::Admission(_) => "Admission",
        Error::Transient(_) => "Transient",
        Error::ProtocolViolation(_) => "ProtocolViolation",
        Error::Codec(_) => "Codec",
    };
    ApiError::new(code, error.to_string())
}

fn lock_error(error: LockError) -> ApiError {
    let code = match &error {
        LockError::UnknownTicket => "UnknownTicket",
        LockError::Prepared => "Prepared",
        LockError::Committed => "Committed",
        LockError::Wounded { .. } => "Wounded",
        LockError::LockHeld => "LockHeld",
        LockError::LockQueued => "LockQueued",
        LockError::LockNotHeld => "LockNotHeld",
        LockError::StateUpdateWithReadLock => "StateUpdateWithReadLock",
        LockError::NotPrepared => "NotPrepared",
        LockError::NotCommitted => "NotCommitted",
        LockError::Internal(_) => "Internal",
    };
    ApiError::new(code, error.to_string())
}

/// Serves `ShardRequest` directly against an in-process [`ShardState`].
/// No replicated log sits underneath this handler: per the component
/// design, UHS shard durability is out of scope for the core.
pub struct ShardHandler {
    shard: Arc<ShardState>,
}

impl ShardHandler {
    /// Wrap `shard` for serving over RPC.
    pub fn new(shard: Arc<ShardState>) -> Self {
        ShardHandler { shard }
    }
}

impl Handler<ShardRequest, ShardResponse> for ShardHandler {
    fn handle(
        &self,
        payload: ShardRequest,
        _reply: Reply<ShardResponse>,
    ) -> Option<Result<ShardResponse, ApiError>> {
        let result = match payload {
            ShardRequest::LockOutputs { dtx_id, items } => {
                let (indices, ctxs): (Vec<usize>, Vec<_>) = items.into_iter().unzip();
                let slice: Vec<ShardCtxItem<'_>> = indices
                    .into_iter()
                    .zip(ctxs.iter())
                    .map(|(index, ctx)| ShardCtxItem { index, ctx })
                    .collect();
                self.shard
                    .lock_outputs(dtx_id, &slice)
                    .map(ShardResponse::Bitmap)
            }
            ShardRequest::ApplyOutputs {
                dtx_id,
                global_complete,
            } => self
                .shard
                .apply_outputs(dtx_id, &global_complete)
                .map(|()| ShardResponse::Unit),
            ShardRequest::DiscardDtx { dtx_id } => self
                .shard
                .discard_dtx(dtx_id)
                .map(|()| ShardResponse::Unit),
            ShardRequest::CheckUnspent { id } => {
                Ok(ShardResponse::Bool(self.shard.check_unspent(&id)))
            }
            ShardRequest::CheckTxId { id } => Ok(ShardResponse::Bool(self.shard.check_tx_id(&id))),
        };
        Some(result.map_err(core_error))
    }
}

/// Serves `BrokerRequest` against a [`RuntimeLockingShardController`].
/// `prepare`/`commit`/`finish` already propose through the controller's
/// own log; `try_lock` and `rollback` act on the live lock manager only,
/// matching the replication split named in the component design.
pub struct RuntimeLockingShardHandler {
    controller: Arc<RuntimeLockingShardController>,
}

impl RuntimeLockingShardHandler {
    /// Wrap `controller` for serving over RPC.
    pub fn new(controller: Arc<RuntimeLockingShardController>) -> Self {
        RuntimeLockingShardHandler { controller }
    }
}

impl Handler<BrokerRequest, BrokerResponse> for RuntimeLockingShardHandler {
    fn handle(
        &self,
        payload: BrokerRequest,
        _reply: Reply<BrokerResponse>,
    ) -> Option<Result<BrokerResponse, ApiError>> {
        match payload {
            BrokerRequest::TryLock {
                ticket_number,
                broker_id,
                key,
                lock_type,
                first_lock,
            } => {
                // The grant/wound outcome is delivered later as a
                // `LockOutcomeMessage`, not in this response; this call
                // only reports whether the request was accepted into the
                // lock manager's queue.
                let manager_reply: settlement_concurrency::ReplyFn = Box::new(|_outcome| {});
                let result = self.controller.try_lock(
                    ticket_number,
                    broker_id,
                    key,
                    lock_type,
                    first_lock,
                    manager_reply,
                );
                Some(result.map(|()| BrokerResponse::Accepted).map_err(lock_error))
            }
            BrokerRequest::Prepare {
                ticket_number,
                broker_id,
                state_update,
            } => Some(
                self.controller
                    .prepare(ticket_number, broker_id, state_update)
                    .map(|()| BrokerResponse::Unit)
                    .map_err(lock_error),
            ),
            BrokerRequest::Commit { ticket_number } => Some(
                self.controller
                    .commit(ticket_number)
                    .map(|()| BrokerResponse::Unit)
                    .map_err(lock_error),
            ),
            BrokerRequest::Rollback { ticket_number } => Some(
                self.controller
                    .rollback(ticket_number)
                    .map(|()| BrokerResponse::Unit)
                    .map_err(lock_error),
            ),
            BrokerRequest::Finish { ticket_number } => Some(
                self.controller
                    .finish(ticket_number)
                    .map(|()| BrokerResponse::Unit)
                    .map_err(lock_error),
            ),
            BrokerRequest::GetTickets { broker_id } => Some(Ok(BrokerResponse::Tickets(
                self.controller.get_tickets(broker_id),
            ))),
        }
    }
}

/// Serves the sentinel admission RPC against a [`CoordinatorController`].
/// Admission is inherently asynchronous — the response only arrives once
/// the ctx's dtx completes a batch cycle — so every request replies via
/// `reply` rather than inline.
pub struct SentinelHandler {
    controller: Arc<CoordinatorController>,
}

impl SentinelHandler {
    /// Wrap `controller` for serving over RPC.
    pub fn new(controller: Arc<CoordinatorController>) -> Self {
        SentinelHandler { controller }
    }
}

impl Handler<AdmissionRequest, AdmissionResponse> for SentinelHandler {
    fn handle(
        &self,
        payload: AdmissionRequest,
        reply: Reply<AdmissionResponse>,
    ) -> Option<Result<AdmissionResponse, ApiError>> {
        let outcome_reply = Box::new(move |outcome: CtxOutcome| {
            let response = match outcome {
                CtxOutcome::Completed => Ok(AdmissionResponse::Completed),
                CtxOutcome::Aborted => Ok(AdmissionResponse::Aborted),
                // Leader failure mid-dtx: the source's contract here is
                // "no response on leader failure", but this handler has
                // already taken ownership of `reply`; closing the
                // connection without ever calling it would leak the
                // callback, so report it as a transient failure instead
                // and let the caller's own retry-via-watchtower path
                // react identically to a dropped connection.
                CtxOutcome::Unknown => {
                    Err(ApiError::new("Transient", "dtx outcome unknown; retry admission"))
                }
            };
            reply(response);
        });

        match self.controller.admit(payload.ctx, outcome_reply) {
            Ok(()) => None,
            Err(e) => Some(Err(ApiError::new("Admission", e.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::TcpServer;
    use crate::shard_client::RemoteShardClient;
    use settlement_core::{Ctx, CtxOutput, ShardRange, TxId, UhsId};
    use settlement_engine::ShardClient;
    use settlement_storage::ShardCtxItem;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn shard_handler_serves_lock_then_apply_over_tcp() {
        let range = ShardRange {
            low: 0x00,
            high: 0xff,
        };
        let shard = Arc::new(ShardState::new(range, 16));
        let server = TcpServer::bind("127.0.0.1:0", Arc::new(ShardHandler::new(shard))).unwrap();
        let client =
            RemoteShardClient::connect(server.local_addr(), range, Duration::from_secs(2))
                .unwrap();

        let output_id = UhsId::new([0xaa; 32]);
        let ctx = Ctx {
            id: TxId::new([1; 32]),
            inputs: vec![],
            outputs: vec![CtxOutput {
                id: output_id,
                value_commitment: vec![1],
                range_proof: None,
            }],
            attestations: vec![],
        };

        let dtx_id = TxId::new([9; 32]);
        let slice = [ShardCtxItem {
            index: 0,
            ctx: &ctx,
        }];
        let bitmap = client.lock_outputs(dtx_id, &slice).unwrap();
        assert_eq!(bitmap, vec![true]);

        let global_complete = HashMap::from([(0, true)]);
        client.apply_outputs(dtx_id, &global_complete).unwrap();

        assert!(client.check_unspent(output_id).unwrap());
        assert!(client.check_tx_id(ctx.id).unwrap());

        server.shutdown();
    }
}
