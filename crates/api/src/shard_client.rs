//! A networked [`ShardClient`] built on [`RpcClient`] and `ShardRequest`.
//!
//! Wraps the same wire payloads [`crate::handlers::ShardHandler`] serves,
//! so a driver running against `RemoteShardClient` and one running
//! against `LocalShardClient` see identical semantics modulo latency and
//! the possibility of a transport failure, which this client downgrades
//! to `Error::Transient` so the driver's existing failure handling covers
//! it without a separate networked-vs-local code path.

use settlement_core::{Error, ShardRange, TxId, UhsId};
use settlement_engine::ShardClient;
use settlement_storage::ShardCtxItem;
use settlement_wire::{ShardRequest, ShardResponse};
use std::collections::HashMap;
use std::io;
use std::net::ToSocketAddrs;
use std::time::Duration;

use crate::client::RpcClient;

/// A `ShardClient` that forwards every call over TCP to a remote
/// [`crate::handlers::ShardHandler`].
pub struct RemoteShardClient {
    client: RpcClient<ShardResponse>,
    range: ShardRange,
    timeout: Duration,
}

impl RemoteShardClient {
    /// Connect to the shard listening at `addr`. `range` is supplied by
    /// the caller's own configuration rather than fetched remotely: it is
    /// static for the lifetime of a shard and every driver already needs
    /// it up front to compute `participating_ranges`.
    pub fn connect(
        addr: impl ToSocketAddrs,
        range: ShardRange,
        timeout: Duration,
    ) -> io::Result<Self> {
        Ok(RemoteShardClient {
            client: RpcClient::connect(addr)?,
            range,
            timeout,
        })
    }

    fn call(&self, request: ShardRequest) -> Result<ShardResponse, Error> {
        self.client
            .call(&request, self.timeout)
            .map_err(|e| Error::Transient(e.to_string()))
    }

    /// Observational: is `id` currently unspent on the remote shard?
    pub fn check_unspent(&self, id: UhsId) -> Result<bool, Error> {
        match self.call(ShardRequest::CheckUnspent { id })? {
            ShardResponse::Bool(b) => Ok(b),
            other => Err(unexpected(&other)),
        }
    }

    /// Observational: has `id` been recorded as a recently completed ctx?
    pub fn check_tx_id(&self, id: TxId) -> Result<bool, Error> {
        match self.call(ShardRequest::CheckTxId { id })? {
            ShardResponse::Bool(b) => Ok(b),
            other => Err(unexpected(&other)),
        }
    }
}

impl ShardClient for RemoteShardClient {
    fn range(&self) -> ShardRange {
        self.range
    }

    fn lock_outputs(&self, dtx_id: TxId, slice: &[ShardCtxItem<'_>]) -> Result<Vec<bool>, Error> {
        let items = slice
            .iter()
            .map(|item| (item.index, item.ctx.clone()))
            .collect();
        match self.call(ShardRequest::LockOutputs { dtx_id, items })? {
            ShardResponse::Bitmap(bitmap) => Ok(bitmap),
            other => Err(unexpected(&other)),
        }
    }

    fn apply_outputs(
        &self,
        dtx_id: TxId,
        global_complete: &HashMap<usize, bool>,
    ) -> Result<(), Error> {
        match self.call(ShardRequest::ApplyOutputs {
            dtx_id,
            global_complete: global_complete.clone(),
        })? {
            ShardResponse::Unit => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn discard_dtx(&self, dtx_id: TxId) -> Result<(), Error> {
        match self.call(ShardRequest::DiscardDtx { dtx_id })? {
            ShardResponse::Unit => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &ShardResponse) -> Error {
    Error::Transient(format!("unexpected shard response: {response:?}"))
}
