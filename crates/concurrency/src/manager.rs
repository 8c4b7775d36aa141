//! The runtime locking shard's lock table and ticket state machine.
//!
//! One mutex guards both the per-key lock table and the ticket table, per
//! the concurrency model: reply callbacks for tickets affected by a wound
//! or a queue sweep are collected while the guard is held and only invoked
//! after it is dropped, so a broker's callback can never reenter the
//! manager while it is locked.

use parking_lot::Mutex;
use settlement_core::{
    BrokerId, KeyState, LockError, LockType, RuntimeKey, RuntimeValue, Ticket, TicketNumber,
    TicketState, WoundedDetails,
};
use std::collections::{HashMap, HashSet};

/// Outcome delivered to a queued or wounded lock request's reply callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The request was granted.
    Granted,
    /// The request's ticket was wounded before it could be granted.
    Wounded(WoundedDetails),
}

/// Callback fired once, outside the manager's mutex, with the eventual
/// outcome of a `try_lock` call. The caller supplies this to bridge back
/// to its RPC transport (a channel, a future waker, a direct response).
pub type ReplyFn = Box<dyn FnOnce(LockOutcome) + Send + 'static>;

struct Inner {
    keys: HashMap<RuntimeKey, KeyState>,
    tickets: HashMap<TicketNumber, Ticket>,
    pending: HashMap<(RuntimeKey, TicketNumber), ReplyFn>,
}

/// A deadlock-free, wound-wait lock manager over an arbitrary key space.
///
/// Older tickets (lower `ticket_number`) never wait for younger ones:
/// a younger lock holder blocking an older requester is wounded instead.
pub struct RuntimeLockManager {
    inner: Mutex<Inner>,
}

impl Default for RuntimeLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeLockManager {
    /// Construct an empty lock manager.
    pub fn new() -> Self {
        RuntimeLockManager {
            inner: Mutex::new(Inner {
                keys: HashMap::new(),
                tickets: HashMap::new(),
                pending: HashMap::new(),
            }),
        }
    }

    /// Request a lock on `key` for `ticket_number`, belonging to `broker_id`.
    ///
    /// `first_lock` must be `true` exactly once per ticket, on its first
    /// call into the manager; every subsequent call for the same ticket
    /// must pass `false`. `reply` is invoked later, outside any lock, with
    /// the grant or wound outcome for this specific request.
    ///
    /// Returns `Ok(())` once the request has been accepted and queued (or
    /// resolved synchronously via `reply`); returns `Err` without ever
    /// invoking `reply` if the request is rejected outright.
    pub fn try_lock(
        &self,
        ticket_number: TicketNumber,
        broker_id: BrokerId,
        key: RuntimeKey,
        lock_type: LockType,
        first_lock: bool,
        reply: ReplyFn,
    ) -> Result<(), LockError> {
        let mut effects: Vec<(ReplyFn, LockOutcome)> = Vec::new();
        {
            let mut inner = self.inner.lock();

            if first_lock && inner.tickets.contains_key(&ticket_number) {
                panic!("try_lock: first_lock=true for a ticket already known to the shard");
            }
            if !first_lock && !inner.tickets.contains_key(&ticket_number) {
                return Err(LockError::UnknownTicket);
            }

            if first_lock {
                inner
                    .tickets
                    .insert(ticket_number, Ticket::new(ticket_number, broker_id));
            }

            {
                let ticket = inner.tickets.get(&ticket_number).expect("just inserted");
                match &ticket.state {
                    TicketState::Prepared => return Err(LockError::Prepared),
                    TicketState::Committed => return Err(LockError::Committed),
                    TicketState::Wounded { details } => {
                        return Err(LockError::Wounded {
                            wounding_ticket: details.wounding_ticket,
                            wounding_key: details.wounding_key.clone(),
                        })
                    }
                    TicketState::Begun => {}
                }
                if let Some(held) = ticket.locks_held.get(&key) {
                    let already_sufficient = match (held, lock_type) {
                        (LockType::Write, _) => true,
                        (LockType::Read, LockType::Read) => true,
                        (LockType::Read, LockType::Write) => false,
                    };
                    if already_sufficient {
                        return Err(LockError::LockHeld);
                    }
                }
                if ticket.queued_locks.contains(&key) {
                    return Err(LockError::LockQueued);
                }
            }

            // Enqueue the request.
            inner
                .tickets
                .get_mut(&ticket_number)
                .unwrap()
                .queued_locks
                .insert(key.clone());
            inner
                .keys
                .entry(key.clone())
                .or_default()
                .lock
                .queue
                .insert(
                    ticket_number,
                    settlement_core::QueuedRequest {
                        ticket_number,
                        lock_type,
                    },
                );
            inner.pending.insert((key.clone(), ticket_number), reply);

            // Wound any younger ticket blocking this request.
            let mut dirty_keys: HashSet<RuntimeKey> = HashSet::new();
            dirty_keys.insert(key.clone());

            let blockers: Vec<TicketNumber> = {
                let lock = &inner.keys.get(&key).unwrap().lock;
                let mut b = Vec::new();
                if let Some(w) = lock.writer {
                    if w > ticket_number {
                        b.push(w);
                    }
                }
                if lock_type == LockType::Write {
                    b.extend(lock.readers.iter().copied().filter(|&r| r > ticket_number));
                }
                b
            };

            for blocker in blockers {
                let immune = matches!(
                    inner.tickets.get(&blocker).map(|t| &t.state),
                    Some(TicketState::Prepared) | Some(TicketState::Committed)
                );
                if immune {
                    tracing::debug!(ticket = blocker, "blocker immune from wounding, prepared");
                    continue;
                }
                tracing::debug!(
                    wounded = blocker,
                    wounded_by = ticket_number,
                    "wounding younger lock holder"
                );
                wound_ticket(
                    &mut inner,
                    blocker,
                    ticket_number,
                    key.clone(),
                    &mut dirty_keys,
                    &mut effects,
                );
            }

            // Sweep every key touched by this request or by a wound.
            for dirty in dirty_keys {
                sweep_key(&mut inner, &dirty, &mut effects);
            }
        }

        for (reply, outcome) in effects {
            reply(outcome);
        }
        Ok(())
    }

    /// Transition `ticket_number` to `Prepared`, buffering `state_update`
    /// to be applied on commit. Every key in `state_update` must be held
    /// for write by this ticket, and the ticket must hold no queued locks.
    pub fn prepare(
        &self,
        ticket_number: TicketNumber,
        state_update: HashMap<RuntimeKey, RuntimeValue>,
    ) -> Result<(), LockError> {
        let mut inner = self.inner.lock();
        let ticket = inner
            .tickets
            .get(&ticket_number)
            .ok_or(LockError::UnknownTicket)?;
        match &ticket.state {
            TicketState::Prepared => return Err(LockError::Prepared),
            TicketState::Committed => return Err(LockError::Committed),
            TicketState::Wounded { details } => {
                return Err(LockError::Wounded {
                    wounding_ticket: details.wounding_ticket,
                    wounding_key: details.wounding_key.clone(),
                })
            }
            TicketState::Begun => {}
        }
        if !ticket.queued_locks.is_empty() {
            return Err(LockError::Internal(
                "prepare called with locks still queued".into(),
            ));
        }
        for key in state_update.keys() {
            match ticket.locks_held.get(key) {
                Some(LockType::Write) => {}
                Some(LockType::Read) => return Err(LockError::StateUpdateWithReadLock),
                None => return Err(LockError::LockNotHeld),
            }
        }

        let ticket = inner.tickets.get_mut(&ticket_number).unwrap();
        ticket.state = TicketState::Prepared;
        ticket.state_update = state_update;
        tracing::debug!(ticket_number, "ticket prepared");
        Ok(())
    }

    /// Apply a prepared ticket's buffered state update and release its
    /// locks, granting any compatible queued requests.
    pub fn commit(&self, ticket_number: TicketNumber) -> Result<(), LockError> {
        let mut effects = Vec::new();
        {
            let mut inner = self.inner.lock();
            let ticket = inner
                .tickets
                .get(&ticket_number)
                .ok_or(LockError::UnknownTicket)?;
            match &ticket.state {
                TicketState::Committed => return Err(LockError::Committed),
                TicketState::Wounded { .. } => return Err(LockError::NotPrepared),
                TicketState::Begun => return Err(LockError::NotPrepared),
                TicketState::Prepared => {}
            }

            let update = inner.tickets[&ticket_number].state_update.clone();
            for (k, v) in update {
                inner.keys.entry(k).or_default().value = v;
            }

            let held: Vec<(RuntimeKey, LockType)> = inner.tickets[&ticket_number]
                .locks_held
                .iter()
                .map(|(k, t)| (k.clone(), *t))
                .collect();
            let mut dirty = HashSet::new();
            for (key, _) in &held {
                release_hold(&mut inner, key, ticket_number);
                dirty.insert(key.clone());
            }

            let ticket = inner.tickets.get_mut(&ticket_number).unwrap();
            ticket.locks_held.clear();
            ticket.state = TicketState::Committed;

            for key in dirty {
                sweep_key(&mut inner, &key, &mut effects);
            }
        }
        tracing::debug!(ticket_number, "ticket committed");
        for (reply, outcome) in effects {
            reply(outcome);
        }
        Ok(())
    }

    /// Abandon a ticket that never committed, releasing any held or
    /// queued locks and deleting it.
    pub fn rollback(&self, ticket_number: TicketNumber) -> Result<(), LockError> {
        let mut effects = Vec::new();
        {
            let mut inner = self.inner.lock();
            let ticket = inner
                .tickets
                .get(&ticket_number)
                .ok_or(LockError::UnknownTicket)?;
            if ticket.state == TicketState::Committed {
                return Err(LockError::Committed);
            }

            let queued: Vec<RuntimeKey> =
                inner.tickets[&ticket_number].queued_locks.iter().cloned().collect();
            let held: Vec<RuntimeKey> = inner.tickets[&ticket_number]
                .locks_held
                .keys()
                .cloned()
                .collect();

            let mut dirty = HashSet::new();
            let details = WoundedDetails {
                wounding_ticket: ticket_number,
                wounding_key: Vec::new(),
            };
            for key in &queued {
                if let Some(k) = inner.keys.get_mut(key) {
                    k.lock.queue.remove(&ticket_number);
                }
                if let Some(reply) = inner.pending.remove(&(key.clone(), ticket_number)) {
                    effects.push((reply, LockOutcome::Wounded(details.clone())));
                }
            }
            for key in &held {
                release_hold(&mut inner, key, ticket_number);
                dirty.insert(key.clone());
            }

            inner.tickets.remove(&ticket_number);
            for key in dirty {
                sweep_key(&mut inner, &key, &mut effects);
            }
        }
        for (reply, outcome) in effects {
            reply(outcome);
        }
        Ok(())
    }

    /// Forget a committed ticket once its commit has been durably
    /// acknowledged to the broker.
    pub fn finish(&self, ticket_number: TicketNumber) -> Result<(), LockError> {
        let mut inner = self.inner.lock();
        let ticket = inner
            .tickets
            .get(&ticket_number)
            .ok_or(LockError::UnknownTicket)?;
        if ticket.state != TicketState::Committed {
            return Err(LockError::NotCommitted);
        }
        inner.tickets.remove(&ticket_number);
        Ok(())
    }

    /// Snapshot of every ticket currently owned by `broker_id`, keyed by
    /// ticket number.
    pub fn get_tickets(&self, broker_id: BrokerId) -> HashMap<TicketNumber, TicketState> {
        let inner = self.inner.lock();
        inner
            .tickets
            .values()
            .filter(|t| t.broker_id == broker_id)
            .map(|t| (t.ticket_number, t.state.clone()))
            .collect()
    }

    /// The committed value for `key`, if any key state has been recorded.
    pub fn value_of(&self, key: &RuntimeKey) -> Option<RuntimeValue> {
        self.inner.lock().keys.get(key).map(|k| k.value.clone())
    }

    /// Directly reinstate a ticket's in-memory state during log replay,
    /// bypassing the normal request protocol. Used only by recovery.
    pub fn restore_ticket(&self, ticket: Ticket, held: &[(RuntimeKey, LockType)]) {
        let mut inner = self.inner.lock();
        for (key, lock_type) in held {
            let lock = &mut inner.keys.entry(key.clone()).or_default().lock;
            match lock_type {
                LockType::Write => lock.writer = Some(ticket.ticket_number),
                LockType::Read => {
                    lock.readers.insert(ticket.ticket_number);
                }
            }
        }
        inner.tickets.insert(ticket.ticket_number, ticket);
    }

    /// Directly apply a committed value during log replay, without going
    /// through the lock protocol.
    pub fn restore_value(&self, key: RuntimeKey, value: RuntimeValue) {
        self.inner.lock().keys.entry(key).or_default().value = value;
    }

    /// Apply a `Commit` log record to a ticket previously reinstated by
    /// [`Self::restore_ticket`]: apply its buffered update, release the
    /// write locks it held, and mark it `Committed`.
    pub fn restore_commit(
        &self,
        ticket_number: TicketNumber,
        broker_id: BrokerId,
        write_keys: &[RuntimeKey],
        update: HashMap<RuntimeKey, RuntimeValue>,
    ) {
        let mut inner = self.inner.lock();
        for (k, v) in update {
            inner.keys.entry(k).or_default().value = v;
        }
        for key in write_keys {
            release_hold(&mut inner, key, ticket_number);
        }
        match inner.tickets.get_mut(&ticket_number) {
            Some(t) => {
                t.locks_held.clear();
                t.state = TicketState::Committed;
            }
            None => {
                let mut t = Ticket::new(ticket_number, broker_id);
                t.state = TicketState::Committed;
                inner.tickets.insert(ticket_number, t);
            }
        }
    }
}

fn release_hold(inner: &mut Inner, key: &RuntimeKey, ticket_number: TicketNumber) {
    if let Some(state) = inner.keys.get_mut(key) {
        if state.lock.writer == Some(ticket_number) {
            state.lock.writer = None;
        }
        state.lock.readers.remove(&ticket_number);
    }
}

fn wound_ticket(
    inner: &mut Inner,
    wounded: TicketNumber,
    wounding_ticket: TicketNumber,
    wounding_key: RuntimeKey,
    dirty_keys: &mut HashSet<RuntimeKey>,
    effects: &mut Vec<(ReplyFn, LockOutcome)>,
) {
    let details = WoundedDetails {
        wounding_ticket,
        wounding_key,
    };

    let queued: Vec<RuntimeKey> = match inner.tickets.get(&wounded) {
        Some(t) => t.queued_locks.iter().cloned().collect(),
        None => return,
    };
    let held: Vec<RuntimeKey> = inner.tickets[&wounded].locks_held.keys().cloned().collect();

    // Queued requests are abandoned outright: removed from the queue so
    // the sweep pass below never considers granting them, and their
    // reply fired here with the wound outcome.
    for key in &queued {
        if let Some(k) = inner.keys.get_mut(key) {
            k.lock.queue.remove(&wounded);
        }
        if let Some(reply) = inner.pending.remove(&(key.clone(), wounded)) {
            effects.push((reply, LockOutcome::Wounded(details.clone())));
        }
        dirty_keys.insert(key.clone());
    }
    for key in &held {
        release_hold(inner, key, wounded);
        dirty_keys.insert(key.clone());
    }

    if let Some(t) = inner.tickets.get_mut(&wounded) {
        t.locks_held.clear();
        t.queued_locks.clear();
        t.state = TicketState::Wounded { details };
    }
}

fn sweep_key(inner: &mut Inner, key: &RuntimeKey, effects: &mut Vec<(ReplyFn, LockOutcome)>) {
    loop {
        let head = match inner.keys.get(key) {
            Some(k) => k.lock.queue.iter().next().map(|(_, r)| r.clone()),
            None => None,
        };
        let Some(req) = head else { break };
        let lock = &mut inner.keys.get_mut(key).unwrap().lock;
        let grant = match req.lock_type {
            LockType::Read => lock.writer.is_none(),
            LockType::Write => {
                lock.is_free() || (lock.readers.len() == 1 && lock.readers.contains(&req.ticket_number))
            }
        };
        if !grant {
            break;
        }
        lock.queue.remove(&req.ticket_number);
        lock.readers.remove(&req.ticket_number);
        match req.lock_type {
            LockType::Read => {
                lock.readers.insert(req.ticket_number);
            }
            LockType::Write => {
                lock.writer = Some(req.ticket_number);
            }
        }
        if let Some(ticket) = inner.tickets.get_mut(&req.ticket_number) {
            ticket.queued_locks.remove(key);
            ticket.locks_held.insert(key.clone(), req.lock_type);
        }
        if let Some(reply) = inner.pending.remove(&(key.clone(), req.ticket_number)) {
            effects.push((reply, LockOutcome::Granted));
        }
        if req.lock_type == LockType::Write {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn reply_channel() -> (ReplyFn, mpsc::Receiver<LockOutcome>) {
        let (tx, rx) = mpsc::channel();
        let reply: ReplyFn = Box::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        (reply, rx)
    }

    #[test]
    fn uncontended_write_lock_grants_immediately() {
        let mgr = RuntimeLockManager::new();
        let (reply, rx) = reply_channel();
        mgr.try_lock(1, 0, b"k".to_vec(), LockType::Write, true, reply)
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), LockOutcome::Granted);
    }

    #[test]
    fn second_lock_same_ticket_without_first_lock_flag_errors_if_unknown() {
        let mgr = RuntimeLockManager::new();
        let (reply, _rx) = reply_channel();
        let err = mgr
            .try_lock(1, 0, b"k".to_vec(), LockType::Write, false, reply)
            .unwrap_err();
        assert_eq!(err, LockError::UnknownTicket);
    }

    #[test]
    fn requesting_already_held_lock_is_rejected() {
        let mgr = RuntimeLockManager::new();
        let (reply, rx) = reply_channel();
        mgr.try_lock(1, 0, b"k".to_vec(), LockType::Write, true, reply)
            .unwrap();
        rx.try_recv().unwrap();
        let (reply2, _rx2) = reply_channel();
        let err = mgr
            .try_lock(1, 0, b"k".to_vec(), LockType::Write, false, reply2)
            .unwrap_err();
        assert_eq!(err, LockError::LockHeld);
    }

    #[test]
    fn younger_writer_is_wounded_by_older_requester() {
        // Ticket 5 holds the write lock first. Ticket 3, older, then
        // requests the same key and wounds ticket 5.
        let mgr = RuntimeLockManager::new();
        let (reply5, rx5) = reply_channel();
        mgr.try_lock(5, 0, b"k".to_vec(), LockType::Write, true, reply5)
            .unwrap();
        assert_eq!(rx5.try_recv().unwrap(), LockOutcome::Granted);

        let (reply3, rx3) = reply_channel();
        mgr.try_lock(3, 0, b"k".to_vec(), LockType::Write, true, reply3)
            .unwrap();
        assert_eq!(rx3.try_recv().unwrap(), LockOutcome::Granted);

        let tickets = mgr.get_tickets(0);
        match &tickets[&5] {
            TicketState::Wounded { details } => {
                assert_eq!(details.wounding_ticket, 3);
                assert_eq!(details.wounding_key, b"k".to_vec());
            }
            other => panic!("expected ticket 5 wounded, got {other:?}"),
        }
        assert_eq!(tickets.get(&3), Some(&TicketState::Begun));

        // A subsequent try_lock by ticket 5, on any key, reports the wound.
        let (reply5b, _rx5b) = reply_channel();
        let err = mgr
            .try_lock(5, 0, b"other".to_vec(), LockType::Write, false, reply5b)
            .unwrap_err();
        assert_eq!(
            err,
            LockError::Wounded {
                wounding_ticket: 3,
                wounding_key: b"k".to_vec(),
            }
        );
    }

    #[test]
    fn older_writer_is_never_wounded_by_younger_requester() {
        // Ticket 3 holds the lock; ticket 5, younger, must queue rather
        // than wound ticket 3.
        let mgr = RuntimeLockManager::new();
        let (reply3, rx3) = reply_channel();
        mgr.try_lock(3, 0, b"k".to_vec(), LockType::Write, true, reply3)
            .unwrap();
        assert_eq!(rx3.try_recv().unwrap(), LockOutcome::Granted);

        let (reply5, rx5) = reply_channel();
        mgr.try_lock(5, 0, b"k".to_vec(), LockType::Write, true, reply5)
            .unwrap();
        assert!(rx5.try_recv().is_err(), "ticket 5 must not be granted yet");

        let tickets = mgr.get_tickets(0);
        assert_eq!(tickets.get(&3), Some(&TicketState::Begun));
        assert_eq!(tickets.get(&5), Some(&TicketState::Begun));

        // Releasing ticket 3 grants the queued request to ticket 5.
        let mut update = HashMap::new();
        update.insert(b"k".to_vec(), b"v".to_vec());
        mgr.prepare(3, update).unwrap();
        mgr.commit(3).unwrap();
        assert_eq!(rx5.try_recv().unwrap(), LockOutcome::Granted);
    }

    #[test]
    fn prepared_ticket_is_immune_from_wounding() {
        // Ticket 5 is prepared holding the write lock on k. Ticket 3,
        // older, requests the same key: it must queue behind 5 rather
        // than wound it. Once 5 commits and releases, 3 is granted.
        let mgr = RuntimeLockManager::new();
        let (reply5, rx5) = reply_channel();
        mgr.try_lock(5, 0, b"k".to_vec(), LockType::Write, true, reply5)
            .unwrap();
        assert_eq!(rx5.try_recv().unwrap(), LockOutcome::Granted);

        let mut update = HashMap::new();
        update.insert(b"k".to_vec(), b"v".to_vec());
        mgr.prepare(5, update).unwrap();

        let (reply3, rx3) = reply_channel();
        mgr.try_lock(3, 0, b"k".to_vec(), LockType::Write, true, reply3)
            .unwrap();
        assert!(rx3.try_recv().is_err(), "ticket 3 must queue, not be granted");
        assert_eq!(mgr.get_tickets(0).get(&5), Some(&TicketState::Prepared));

        mgr.commit(5).unwrap();
        assert_eq!(rx3.try_recv().unwrap(), LockOutcome::Granted);
    }

    #[test]
    fn rollback_releases_held_and_queued_locks() {
        let mgr = RuntimeLockManager::new();
        let (reply1, rx1) = reply_channel();
        mgr.try_lock(1, 0, b"k".to_vec(), LockType::Write, true, reply1)
            .unwrap();
        rx1.try_recv().unwrap();

        let (reply2, rx2) = reply_channel();
        mgr.try_lock(10, 0, b"k".to_vec(), LockType::Write, true, reply2)
            .unwrap();
        assert!(rx2.try_recv().is_err());

        mgr.rollback(1).unwrap();
        assert_eq!(rx2.try_recv().unwrap(), LockOutcome::Granted);
        assert!(mgr.get_tickets(0).get(&1).is_none());
    }

    #[test]
    fn finish_requires_committed_state() {
        let mgr = RuntimeLockManager::new();
        let (reply, rx) = reply_channel();
        mgr.try_lock(1, 0, b"k".to_vec(), LockType::Write, true, reply)
            .unwrap();
        rx.try_recv().unwrap();
        assert_eq!(mgr.finish(1).unwrap_err(), LockError::NotCommitted);

        let mut update = HashMap::new();
        update.insert(b"k".to_vec(), b"v".to_vec());
        mgr.prepare(1, update).unwrap();
        mgr.commit(1).unwrap();
        mgr.finish(1).unwrap();
        assert!(mgr.get_tickets(0).get(&1).is_none());
    }

    #[test]
    fn concurrent_readers_are_both_granted() {
        let mgr = RuntimeLockManager::new();
        let (reply1, rx1) = reply_channel();
        mgr.try_lock(1, 0, b"k".to_vec(), LockType::Read, true, reply1)
            .unwrap();
        let (reply2, rx2) = reply_channel();
        mgr.try_lock(2, 0, b"k".to_vec(), LockType::Read, true, reply2)
            .unwrap();
        assert_eq!(rx1.try_recv().unwrap(), LockOutcome::Granted);
        assert_eq!(rx2.try_recv().unwrap(), LockOutcome::Granted);
    }

    #[test]
    fn writer_request_wounds_all_younger_readers() {
        let mgr = RuntimeLockManager::new();
        for reader in [4u64, 5, 6] {
            let (reply, rx) = reply_channel();
            mgr.try_lock(reader, 0, b"k".to_vec(), LockType::Read, true, reply)
                .unwrap();
            assert_eq!(rx.try_recv().unwrap(), LockOutcome::Granted);
        }
        let (reply1, rx1) = reply_channel();
        mgr.try_lock(1, 0, b"k".to_vec(), LockType::Write, true, reply1)
            .unwrap();
        assert_eq!(rx1.try_recv().unwrap(), LockOutcome::Granted);

        let tickets = mgr.get_tickets(0);
        for reader in [4u64, 5, 6] {
            assert!(matches!(tickets[&reader], TicketState::Wounded { .. }));
        }
    }

    proptest::proptest! {
        /// Wound-wait progress, for an arbitrary contending set: whichever
        /// ticket number is smallest among them is never wounded, no
        /// matter what order the requests for the same key arrive in.
        #[test]
        fn smallest_ticket_among_contenders_is_never_wounded(
            raw in proptest::collection::vec(1u64..500, 2..8)
        ) {
            let mut seen = HashSet::new();
            let tickets: Vec<u64> = raw.into_iter().filter(|t| seen.insert(*t)).collect();
            proptest::prop_assume!(tickets.len() >= 2);
            let smallest = *tickets.iter().min().unwrap();

            let mgr = RuntimeLockManager::new();
            for &t in &tickets {
                let (reply, _rx) = reply_channel();
                mgr.try_lock(t, 0, b"k".to_vec(), LockType::Write, true, reply).unwrap();
            }

            let states = mgr.get_tickets(0);
            proptest::prop_assert!(
                !matches!(states.get(&smallest), Some(TicketState::Wounded { .. })),
                "smallest ticket was wounded"
            );
        }
    }
}
