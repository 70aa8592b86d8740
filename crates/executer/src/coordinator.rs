use std::collections::{HashMap, HashSet};

use axon_types::Update;
use parking_lot::Mutex;

/// Opaque optimistic-read handle. Holds only the ticket's serial; the
/// coordinator keeps the bookkeeping.
#[derive(Debug)]
pub struct ReadTicket(u64);

struct TicketState {
    read_set: HashSet<String>,
    valid:    bool
}

/// Arbitrates optimistic snapshot reads against pool mutations.
///
/// A ticket records the resources its holder read; every applied update
/// invalidates the open tickets whose read set it touches. Invalidation is
/// monotone: once `confirm_read` returns false for a ticket it stays false.
#[derive(Default)]
pub struct Coordinator {
    table: Mutex<Table>
}

#[derive(Default)]
struct Table {
    next_serial: u64,
    open:        HashMap<u64, TicketState>
}

impl Coordinator {
    pub fn request_read(&self, resources: HashSet<String>) -> ReadTicket {
        let mut table = self.table.lock();
        let serial = table.next_serial;
        table.next_serial += 1;
        table
            .open
            .insert(serial, TicketState { read_set: resources, valid: true });
        ReadTicket(serial)
    }

    /// True iff nothing in the ticket's read set was assigned since the
    /// ticket was issued.
    pub fn confirm_read(&self, ticket: &ReadTicket) -> bool {
        self.table
            .lock()
            .open
            .get(&ticket.0)
            .map(|state| state.valid)
            .unwrap_or(false)
    }

    pub fn close_read(&self, ticket: ReadTicket) {
        self.table.lock().open.remove(&ticket.0);
    }

    /// Invalidates every open ticket whose read set intersects the update's
    /// assigned resources.
    pub fn notify_applied(&self, update: &Update) {
        let assigned = update.assigned();
        let mut table = self.table.lock();
        for state in table.open.values_mut() {
            if state.valid && state.read_set.iter().any(|r| assigned.contains(r.as_str())) {
                state.valid = false;
            }
        }
    }

    #[cfg(test)]
    fn open_tickets(&self) -> usize {
        self.table.lock().open.len()
    }
}

#[cfg(test)]
mod test {
    use axon_types::{Assignment, Value};

    use super::*;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn update(names: &[&str]) -> Update {
        Update::new(
            names
                .iter()
                .map(|n| Assignment::new(*n, Value::Integer(0)))
                .collect()
        )
        .unwrap()
    }

    #[test]
    fn intersecting_apply_invalidates() {
        let coordinator = Coordinator::default();
        let ticket = coordinator.request_read(set(&["a", "b"]));
        assert!(coordinator.confirm_read(&ticket));
        coordinator.notify_applied(&update(&["b"]));
        assert!(!coordinator.confirm_read(&ticket));
    }

    #[test]
    fn disjoint_apply_keeps_ticket_valid() {
        let coordinator = Coordinator::default();
        let ticket = coordinator.request_read(set(&["a"]));
        coordinator.notify_applied(&update(&["x", "y"]));
        assert!(coordinator.confirm_read(&ticket));
    }

    #[test]
    fn invalidation_is_monotone() {
        let coordinator = Coordinator::default();
        let ticket = coordinator.request_read(set(&["a"]));
        coordinator.notify_applied(&update(&["a"]));
        for _ in 0..4 {
            assert!(!coordinator.confirm_read(&ticket));
        }
        // later applies must not resurrect it either
        coordinator.notify_applied(&update(&["z"]));
        assert!(!coordinator.confirm_read(&ticket));
    }

    #[test]
    fn tickets_are_independent() {
        let coordinator = Coordinator::default();
        let hit = coordinator.request_read(set(&["a"]));
        let unhit = coordinator.request_read(set(&["b"]));
        coordinator.notify_applied(&update(&["a"]));
        assert!(!coordinator.confirm_read(&hit));
        assert!(coordinator.confirm_read(&unhit));
    }

    #[test]
    fn close_reclaims_bookkeeping() {
        let coordinator = Coordinator::default();
        let ticket = coordinator.request_read(set(&["a"]));
        assert_eq!(coordinator.open_tickets(), 1);
        coordinator.close_read(ticket);
        assert_eq!(coordinator.open_tickets(), 0);
    }
}
