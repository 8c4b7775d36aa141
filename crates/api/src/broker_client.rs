//! A networked broker-side client for the runtime locking shard, built on
//! [`RpcClient`] and `BrokerRequest`.
//!
//! The out-of-band [`settlement_wire::LockOutcomeMessage`] push named in
//! the component design (a `try_lock` grant or wound can arrive well
//! after the request that caused it) is not wired up here: this client
//! exposes only the six direct request/response calls, and a caller that
//! needs the asynchronous grant/wound notification polls `get_tickets`
//! instead. A full push channel would need either a second listening
//! socket or a server-initiated message on this same connection outside
//! the request/response envelope, neither of which this RPC plumbing
//! supports yet.

use settlement_core::{BrokerId, LockError, LockType, RuntimeKey, RuntimeValue, TicketNumber, TicketState};
use settlement_wire::{ApiError, BrokerRequest, BrokerResponse};
use std::collections::HashMap;
use std::io;
use std::net::ToSocketAddrs;
use std::time::Duration;

use crate::client::RpcClient;

/// A broker's handle to a remote runtime locking shard.
pub struct RemoteBrokerClient {
    client: RpcClient<BrokerResponse>,
    timeout: Duration,
}

impl RemoteBrokerClient {
    /// Connect to the runtime locking shard listening at `addr`.
    pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> io::Result<Self> {
        Ok(RemoteBrokerClient {
            client: RpcClient::connect(addr)?,
            timeout,
        })
    }

    fn call(&self, request: BrokerRequest) -> Result<BrokerResponse, LockError> {
        self.client
            .call(&request, self.timeout)
            .map_err(to_lock_error)
    }

    /// Request a lock; the grant or wound itself is not observed here.
    pub fn try_lock(
        &self,
        ticket_number: TicketNumber,
        broker_id: BrokerId,
        key: RuntimeKey,
        lock_type: LockType,
        first_lock: bool,
    ) -> Result<(), LockError> {
        self.call(BrokerRequest::TryLock {
            ticket_number,
            broker_id,
            key,
            lock_type,
            first_lock,
        })
        .map(|_| ())
    }

    /// Buffer `state_update` and mark `ticket_number` prepared.
    pub fn prepare(
        &self,
        ticket_number: TicketNumber,
        broker_id: BrokerId,
        state_update: HashMap<RuntimeKey, RuntimeValue>,
    ) -> Result<(), LockError> {
        self.call(BrokerRequest::Prepare {
            ticket_number,
            broker_id,
            state_update,
        })
        .map(|_| ())
    }

    /// Commit a prepared ticket.
    pub fn commit(&self, ticket_number: TicketNumber) -> Result<(), LockError> {
        self.call(BrokerRequest::Commit { ticket_number }).map(|_| ())
    }

    /// Roll back a prepared ticket.
    pub fn rollback(&self, ticket_number: TicketNumber) -> Result<(), LockError> {
        self.call(BrokerRequest::Rollback { ticket_number }).map(|_| ())
    }

    /// Forget a committed ticket.
    pub fn finish(&self, ticket_number: TicketNumber) -> Result<(), LockError> {
        self.call(BrokerRequest::Finish { ticket_number }).map(|_| ())
    }

    /// List every ticket tracked for `broker_id`, for recovery.
    pub fn get_tickets(
        &self,
        broker_id: BrokerId,
    ) -> Result<HashMap<TicketNumber, TicketState>, LockError> {
        match self.call(BrokerRequest::GetTickets { broker_id })? {
            BrokerResponse::Tickets(tickets) => Ok(tickets),
            other => Err(LockError::Internal(format!(
                "unexpected broker response to get_tickets: {other:?}"
            ))),
        }
    }
}

// `ApiError` carries only a code and a free-text message, so a `Wounded`
// reply's `wounding_ticket`/`wounding_key` cannot be reconstructed here;
// the caller gets the variant with placeholder fields and should fall
// back to the message text for diagnostics until the wire error type
// carries them structurally.
fn to_lock_error(error: ApiError) -> LockError {
    match error.code.as_str() {
        "UnknownTicket" => LockError::UnknownTicket,
        "Prepared" => LockError::Prepared,
        "Committed" => LockError::Committed,
        "LockHeld" => LockError::LockHeld,
        "LockQueued" => LockError::LockQueued,
        "LockNotHeld" => LockError::LockNotHeld,
        "StateUpdateWithReadLock" => LockError::StateUpdateWithReadLock,
        "NotPrepared" => LockError::NotPrepared,
        "NotCommitted" => LockError::NotCommitted,
        "Wounded" => LockError::Wounded {
            wounding_ticket: 0,
            wounding_key: Vec::new(),
        },
        _ => LockError::Internal(error.message),
    }
}
