//! Rebuilding a [`RuntimeLockManager`]'s in-memory state from a replicated
//! log without re-running the lock protocol.
//!
//! On leader election a fresh runtime locking shard replays its log from
//! the start: `Prepare` records reinstate the write locks a ticket held at
//! prepare time without re-queuing anything, `Commit` records apply the
//! buffered state update directly, and `Finish` records remove the ticket.
//! No wounding or sweeping happens during replay; the log already reflects
//! a serial, conflict-free history.

use crate::manager::RuntimeLockManager;
use serde::{Deserialize, Serialize};
use settlement_core::{BrokerId, LockType, RuntimeKey, RuntimeValue, Ticket, TicketNumber, TicketState};
use std::collections::HashMap;

/// One record in the runtime locking shard's replicated log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogEntry {
    /// `prepare` was accepted: the ticket holds these write locks and a
    /// buffered update, but nothing has been applied to `keys` yet.
    Prepare {
        /// The prepared ticket.
        ticket_number: TicketNumber,
        /// Owning broker.
        broker_id: BrokerId,
        /// Keys held for write, to be reinstated on replay.
        write_keys: Vec<RuntimeKey>,
        /// The buffered state update.
        state_update: HashMap<RuntimeKey, RuntimeValue>,
    },
    /// `commit` was accepted: the update has been applied and the
    /// ticket's locks released.
    Commit {
        /// The committed ticket.
        ticket_number: TicketNumber,
    },
    /// `finish` was accepted: the ticket is forgotten.
    Finish {
        /// The finished ticket.
        ticket_number: TicketNumber,
    },
}

/// Replay `entries` in order into a fresh manager, returning it.
pub fn replay(entries: &[LogEntry]) -> RuntimeLockManager {
    let manager = RuntimeLockManager::new();
    let mut prepared: HashMap<TicketNumber, (BrokerId, Vec<RuntimeKey>, HashMap<RuntimeKey, RuntimeValue>)> =
        HashMap::new();

    for entry in entries {
        match entry {
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
                manager.restore_ticket(ticket, &held);
                prepared.insert(
                    *ticket_number,
                    (*broker_id, write_keys.clone(), state_update.clone()),
                );
            }
            LogEntry::Commit { ticket_number } => {
                if let Some((broker_id, write_keys, state_update)) = prepared.remove(ticket_number) {
                    manager.restore_commit(*ticket_number, broker_id, &write_keys, state_update);
                }
            }
            LogEntry::Finish { ticket_number } => {
                let _ = manager.finish(*ticket_number);
            }
        }
    }
    manager
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlement_core::TicketState;

    #[test]
    fn replay_reinstates_prepared_ticket_with_its_write_lock() {
        let mut update = HashMap::new();
        update.insert(b"balance:alice".to_vec(), b"100".to_vec());
        let entries = vec![LogEntry::Prepare {
            ticket_number: 1,
            broker_id: 7,
            write_keys: vec![b"balance:alice".to_vec()],
            state_update: update,
        }];
        let manager = replay(&entries);
        let tickets = manager.get_tickets(7);
        assert_eq!(tickets.get(&1), Some(&TicketState::Prepared));
        // The value is not visible yet: commit has not replayed.
        assert_eq!(manager.value_of(&b"balance:alice".to_vec()), None);
    }

    #[test]
    fn replay_applies_commit_and_forgets_on_finish() {
        let mut update = HashMap::new();
        update.insert(b"balance:alice".to_vec(), b"100".to_vec());
        let entries = vec![
            LogEntry::Prepare {
                ticket_number: 1,
                broker_id: 7,
                write_keys: vec![b"balance:alice".to_vec()],
                state_update: update,
            },
            LogEntry::Commit { ticket_number: 1 },
        ];
        let manager = replay(&entries);
        assert_eq!(
            manager.value_of(&b"balance:alice".to_vec()),
            Some(b"100".to_vec())
        );
        assert_eq!(
            manager.get_tickets(7).get(&1),
            Some(&TicketState::Committed)
        );

        let manager = replay(&[
            entries[0].clone(),
            entries[1].clone(),
            LogEntry::Finish { ticket_number: 1 },
        ]);
        assert!(manager.get_tickets(7).is_empty());
    }
}
