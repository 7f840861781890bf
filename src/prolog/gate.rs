//! FIFO ticket gate.
//!
//! Callers are admitted strictly in arrival order, one at a time. A plain
//! mutex gives no ordering guarantee between waiters; this does.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

#[derive(Debug, Default)]
pub struct Gate {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

/// Held while a caller owns the gate. Dropping it admits the next ticket.
#[must_use]
pub struct GatePass<'a> {
    gate: &'a Gate,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a ticket and block until it is served.
    pub fn enter(&self) -> GatePass<'_> {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            self.turn.wait(&mut tickets);
        }
        GatePass { gate: self }
    }

    /// Number of callers holding or waiting for the gate.
    #[cfg(test)]
    pub fn queued(&self) -> u64 {
        let tickets = self.tickets.lock();
        tickets.next - tickets.serving
    }
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        let mut tickets = self.gate.tickets.lock();
        tickets.serving += 1;
        drop(tickets);
        self.gate.turn.notify_all();
    }
}
