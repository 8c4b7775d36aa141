//! Ticket and key-state types for the runtime locking shard.

use crate::types::{BrokerId, RuntimeKey, RuntimeValue, TicketNumber};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Lock kind requested or held on a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockType {
    /// Shared read lock; any number of readers may hold it concurrently.
    Read,
    /// Exclusive write lock; incompatible with any reader or writer.
    Write,
}

/// Lifecycle state of a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketState {
    /// Actively acquiring locks.
    Begun,
    /// Wounded by an older ticket; all locks released.
    Wounded {
        /// Details identifying the wound.
        details: WoundedDetails,
    },
    /// Prepared: holds its write locks immutably until commit.
    Prepared,
    /// Committed: state update applied, locks released.
    Committed,
}

/// Identifies which ticket wounded this one and over which key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WoundedDetails {
    /// The ticket number that caused the wound.
    pub wounding_ticket: TicketNumber,
    /// The key the wound occurred over.
    pub wounding_key: RuntimeKey,
}

/// Per-ticket bookkeeping held by the runtime locking shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Monotone number assigned by the external ticket machine.
    pub ticket_number: TicketNumber,
    /// Current lifecycle state.
    pub state: TicketState,
    /// Locks currently held, keyed by key.
    pub locks_held: HashMap<RuntimeKey, LockType>,
    /// Keys this ticket is queued (not yet granted) on.
    pub queued_locks: HashSet<RuntimeKey>,
    /// Buffered state update to apply on commit.
    pub state_update: HashMap<RuntimeKey, RuntimeValue>,
    /// The broker that owns this ticket.
    pub broker_id: BrokerId,
}

impl Ticket {
    /// Construct a fresh ticket in the `Begun` state.
    pub fn new(ticket_number: TicketNumber, broker_id: BrokerId) -> Self {
        Ticket {
            ticket_number,
            state: TicketState::Begun,
            locks_held: HashMap::new(),
            queued_locks: HashSet::new(),
            state_update: HashMap::new(),
            broker_id,
        }
    }
}

/// A queued lock request waiting on a key, ordered by ticket number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// The requesting ticket.
    pub ticket_number: TicketNumber,
    /// The kind of lock requested.
    pub lock_type: LockType,
}

/// Lock state for a single key: an optional writer, a set of readers, and
/// an ordered queue of pending requests.
///
/// Invariant: if `writer` is set, `readers` is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyLock {
    /// The ticket currently holding the write lock, if any.
    pub writer: Option<TicketNumber>,
    /// Tickets currently holding a read lock.
    pub readers: HashSet<TicketNumber>,
    /// Pending requests, ordered by ticket number ascending.
    pub queue: BTreeMap<TicketNumber, QueuedRequest>,
}

impl KeyLock {
    /// Whether the lock is currently free (no writer, no readers).
    pub fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

/// Full per-key state tracked by the runtime locking shard: the committed
/// value plus its lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyState {
    /// Current committed value.
    pub value: RuntimeValue,
    /// Lock held on this key.
    pub lock: KeyLock,
}
