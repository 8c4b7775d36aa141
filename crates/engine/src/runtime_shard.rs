//! The runtime locking shard's replicated state machine and its broker-
//! facing controller.
//!
//! `TicketLogState` wraps a [`RuntimeLockManager`] and replays the same
//! three record kinds [`recovery::replay`] does, but incrementally through
//! [`StateMachine::apply`] so a single log instance can serve both a fresh
//! replay at startup and live appends while leading. `rollback` is
//! deliberately absent from the command set: it leaves no durable state.

use parking_lot::Mutex as PlMutex;
use settlement_concurrency::recovery::LogEntry;
use settlement_concurrency::{ReplyFn as ManagerReplyFn, RuntimeLockManager};
use settlement_core::{
    BrokerId, LockError, LockType, RuntimeKey, RuntimeValue, Ticket, TicketNumber, TicketState,
};
use settlement_durability::{DurabilityMode, ReplicatedLog, StateMachine, WalError};
use std::collections::HashMap;
use std::path::Path;

/// The runtime locking shard's replicated state machine: a lock manager
/// plus the buffer of prepared-but-not-yet-committed updates a `Commit`
/// record needs to find again.
pub struct TicketLogState {
    manager: RuntimeLockManager,
    prepared: HashMap<TicketNumber, (BrokerId, Vec<RuntimeKey>, HashMap<RuntimeKey, RuntimeValue>)>,
}

impl Default for TicketLogState {
    fn default() -> Self {
        TicketLogState {
            manager: RuntimeLockManager::new(),
            prepared: HashMap::new(),
        }
    }
}

impl TicketLogState {
    /// The manager this state machine maintains. Borrowed by the
    /// controller to serve non-replicated calls (`try_lock`, `rollback`,
    /// `get_tickets`) directly.
    pub fn manager(&self) -> &RuntimeLockManager {
        &self.manager
    }
}

impl StateMachine for TicketLogState {
    type Command = LogEntry;
    type Applied = ();

    fn apply(&mut self, command: &LogEntry) {
        match command {
            LogEntry::Prepare {
                ticket_number,
                broker_id,
                write_keys,
                state_update,
            } => {
                let mut ticket = Ticket::new(*ticket_number, *broker_id);
                ticket.state = TicketState::Prepared;
                ticket.state_update = state_update.clone();
                for key in write_keys {
                    ticket.locks_held.insert(key.clone(), LockType::Write);
                }
                let held: Vec<(RuntimeKey, LockType)> = write_keys
                    .iter()
                    .map(|k| (k.clone(), LockType::Write))
                    .collect();
                self.manager.restore_ticket(ticket, &held);
                self.prepared.insert(
                    *ticket_number,
                    (*broker_id, write_keys.clone(), state_update.clone()),
                );
            }
            LogEntry::Commit { ticket_number } => {
                if let Some((broker_id, write_keys, state_update)) =
                    self.prepared.remove(ticket_number)
                {
                    self.manager
                        .restore_commit(*ticket_number, broker_id, &write_keys, state_update);
                } else {
                    tracing::error!(ticket_number, "commit record with no matching prepare");
                    panic!("protocol violation: commit without prepare for ticket {ticket_number}");
                }
            }
            LogEntry::Finish { ticket_number } => {
                let _ = self.manager.finish(*ticket_number);
            }
        }
    }
}

/// Broker-facing controller over a replicated [`TicketLogState`]: `prepare`,
/// `commit` and `finish` append to the log before mutating the manager;
/// `try_lock`, `rollback` and `get_tickets` go straight to the manager.
pub struct RuntimeLockingShardController {
    log: PlMutex<ReplicatedLog<TicketLogState>>,
}

impl RuntimeLockingShardController {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path, mode: DurabilityMode) -> Result<Self, WalError> {
        Ok(RuntimeLockingShardController {
            log: PlMutex::new(ReplicatedLog::open(path, mode)?),
        })
    }

    /// Become leader for `term`, replaying the log.
    pub fn become_leader(&self, term: u64) -> Result<(), WalError> {
        self.log.lock().become_leader(term)
    }

    /// Step down; RPCs that would replicate are refused until re-elected.
    pub fn become_follower(&self, leader_hint: Option<u64>) {
        self.log.lock().become_follower(leader_hint);
    }

    /// Request a lock. Not replicated: an unprepared ticket's lock state is
    /// reconstructible from nothing durable and is safe to lose on crash.
    pub fn try_lock(
        &self,
        ticket_number: TicketNumber,
        broker_id: BrokerId,
        key: RuntimeKey,
        lock_type: LockType,
        first_lock: bool,
        reply: ManagerReplyFn,
    ) -> Result<(), LockError> {
        self.log
            .lock()
            .state()
            .manager()
            .try_lock(ticket_number, broker_id, key, lock_type, first_lock, reply)
    }

    /// Prepare a ticket, replicating the buffered update before it takes
    /// effect on the in-memory manager.
    pub fn prepare(
        &self,
        ticket_number: TicketNumber,
        broker_id: BrokerId,
        state_update: HashMap<RuntimeKey, RuntimeValue>,
    ) -> Result<(), LockError> {
        let write_keys: Vec<RuntimeKey> = {
            let log = self.log.lock();
            let manager = log.state().manager();
            let tickets = manager.get_tickets(broker_id);
            if !tickets.contains_key(&ticket_number) {
                return Err(LockError::UnknownTicket);
            }
            state_update.keys().cloned().collect()
        };

        // Validate and apply against the live manager first, so a bad
        // request never reaches the log. `propose` then re-derives the same
        // end state through `TicketLogState::apply`'s `restore_ticket` path,
        // which is idempotent over an already-prepared ticket: it is the
        // same record a future replay produces, applied redundantly here
        // just to get it appended.
        self.log
            .lock()
            .state()
            .manager()
            .prepare(ticket_number, state_update.clone())?;

        self.propose(LogEntry::Prepare {
            ticket_number,
            broker_id,
            write_keys,
            state_update,
        });
        Ok(())
    }

    /// Commit a prepared ticket, applying it live and then replicating the
    /// record so replay reaches the same state.
    pub fn commit(&self, ticket_number: TicketNumber) -> Result<(), LockError> {
        self.log.lock().state().manager().commit(ticket_number)?;
        self.propose(LogEntry::Commit { ticket_number });
        Ok(())
    }

    /// Roll back a ticket. Not replicated: leaves no durable state.
    pub fn rollback(&self, ticket_number: TicketNumber) -> Result<(), LockError> {
        self.log.lock().state().manager().rollback(ticket_number)
    }

    /// Forget a committed ticket, replicating the fact so replay does not
    /// resurrect it.
    pub fn finish(&self, ticket_number: TicketNumber) -> Result<(), LockError> {
        self.log.lock().state().manager().finish(ticket_number)?;
        self.propose(LogEntry::Finish { ticket_number });
        Ok(())
    }

    /// Tickets currently owned by `broker_id`.
    pub fn get_tickets(&self, broker_id: BrokerId) -> HashMap<TicketNumber, TicketState> {
        self.log.lock().state().manager().get_tickets(broker_id)
    }

    /// Committed value for `key`, if any.
    pub fn value_of(&self, key: &RuntimeKey) -> Option<RuntimeValue> {
        self.log.lock().state().manager().value_of(key)
    }

    fn propose(&self, entry: LogEntry) {
        if let Err(e) = self.log.lock().propose(entry) {
            tracing::warn!(error = %e, "failed to replicate runtime locking shard record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlement_concurrency::LockOutcome;
    use settlement_core::LockType;
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn controller() -> (tempfile::TempDir, RuntimeLockingShardController) {
        let dir = tempdir().unwrap();
        let controller =
            RuntimeLockingShardController::open(&dir.path().join("shard.log"), DurabilityMode::Always)
                .unwrap();
        controller.become_leader(1).unwrap();
        (dir, controller)
    }

    #[test]
    fn prepare_commit_finish_round_trip() {
        let (_dir, controller) = controller();
        let (tx, rx) = mpsc::channel();
        controller
            .try_lock(1, 7, b"k".to_vec(), LockType::Write, true, Box::new(move |o| tx.send(o).unwrap()))
            .unwrap();
        assert_eq!(rx.recv().unwrap(), LockOutcome::Granted);

        let mut update = HashMap::new();
        update.insert(b"k".to_vec(), b"v".to_vec());
        controller.prepare(1, 7, update).unwrap();
        assert_eq!(controller.get_tickets(7).get(&1), Some(&TicketState::Prepared));

        controller.commit(1).unwrap();
        assert_eq!(controller.value_of(&b"k".to_vec()), Some(b"v".to_vec()));
        assert_eq!(controller.get_tickets(7).get(&1), Some(&TicketState::Committed));

        controller.finish(1).unwrap();
        assert!(controller.get_tickets(7).is_empty());
    }

    #[test]
    fn rollback_releases_without_replicating() {
        let (_dir, controller) = controller();
        let (tx, rx) = mpsc::channel();
        controller
            .try_lock(2, 7, b"k".to_vec(), LockType::Write, true, Box::new(move |o| tx.send(o).unwrap()))
            .unwrap();
        assert_eq!(rx.recv().unwrap(), LockOutcome::Granted);
        controller.rollback(2).unwrap();
        assert!(controller.get_tickets(7).is_empty());
    }

    #[test]
    fn recovery_reinstates_prepared_ticket_with_its_write_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shard.log");
        {
            let controller = RuntimeLockingShardController::open(&path, DurabilityMode::Always).unwrap();
            controller.become_leader(1).unwrap();
            let (tx, rx) = mpsc::channel();
            controller
                .try_lock(3, 9, b"bal".to_vec(), LockType::Write, true, Box::new(move |o| tx.send(o).unwrap()))
                .unwrap();
            assert_eq!(rx.recv().unwrap(), LockOutcome::Granted);
            let mut update = HashMap::new();
            update.insert(b"bal".to_vec(), b"100".to_vec());
            controller.prepare(3, 9, update).unwrap();
        }
        let controller = RuntimeLockingShardController::open(&path, DurabilityMode::Always).unwrap();
        controller.become_leader(2).unwrap();
        assert_eq!(controller.get_tickets(9).get(&3), Some(&TicketState::Prepared));
        assert_eq!(controller.value_of(&b"bal".to_vec()), None);
        controller.commit(3).unwrap();
        assert_eq!(controller.value_of(&b"bal".to_vec()), Some(b"100".to_vec()));
    }
}
