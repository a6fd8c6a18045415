//! Cancellation handle for one send.
//!
//! Cancelling is honoured until the send commits to ledger submission;
//! after that the metadata may already be in the pool and the send runs to
//! completion.

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TicketState {
    Open,
    Cancelled,
    Committed,
}

#[derive(Debug, Clone)]
pub struct SendTicket {
    state: Arc<Mutex<TicketState>>,
}

impl Default for SendTicket {
    fn default() -> Self {
        Self { state: Arc::new(Mutex::new(TicketState::Open)) }
    }
}

impl SendTicket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the cancellation took effect.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            TicketState::Open | TicketState::Cancelled => {
                *state = TicketState::Cancelled;
                true
            }
            TicketState::Committed => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.lock() == TicketState::Cancelled
    }

    pub fn is_committed(&self) -> bool {
        *self.state.lock() == TicketState::Committed
    }

    /// Point of no return. Fails if the ticket was cancelled first.
    pub(crate) fn commit(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            TicketState::Open | TicketState::Committed => {
                *state = TicketState::Committed;
                true
            }
            TicketState::Cancelled => false,
        }
    }
}
