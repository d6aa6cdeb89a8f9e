// ===============================
// src/replica.rs
// ===============================
//
// Disposable read replica for one view (buyer list, one buyer's ledger,
// purchases). Keeps "no data" and "fetch failed" apart, and never lets a
// failed or empty refresh wipe data that was already shown.
//
// Every fetch takes a ticket; `dispose()` or a newer `begin()` makes older
// tickets stale and their results are dropped on arrival.
//
use crate::client::{ReadOutcome, RequestState};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Clone)]
pub struct Replica<T> {
    items: Vec<T>,
    error: Option<String>,
    state: RequestState,
    loaded_once: bool,
    epoch: u64,
}

impl<T> Default for Replica<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            error: None,
            state: RequestState::Idle,
            loaded_once: false,
            epoch: 0,
        }
    }
}

impl<T> Replica<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == RequestState::Pending
    }

    pub fn has_loaded(&self) -> bool {
        self.loaded_once
    }

    /// Loaded without error but nothing to show.
    pub fn is_empty_ok(&self) -> bool {
        self.items.is_empty() && self.error.is_none() && self.state == RequestState::Succeeded
    }

    pub fn begin(&mut self) -> Ticket {
        self.epoch += 1;
        self.state = RequestState::Pending;
        Ticket(self.epoch)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.0 == self.epoch
    }

    /// Apply a successful read. Returns false when the ticket was stale.
    pub fn apply(&mut self, ticket: Ticket, outcome: ReadOutcome<T>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        match outcome {
            ReadOutcome::Loaded(items) => {
                self.items = items;
                self.loaded_once = true;
            }
            ReadOutcome::Empty => {
                // sudah pernah tampil -> biarkan data lama
                if !self.loaded_once {
                    self.items.clear();
                }
            }
        }
        self.error = None;
        self.state = RequestState::Succeeded;
        true
    }

    /// Apply a failed read. Prior data stays if anything was loaded before.
    pub fn apply_error(&mut self, ticket: Ticket, err: &SyncError) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        if !self.loaded_once {
            self.items.clear();
        }
        self.error = Some(err.to_string());
        self.state = RequestState::Failed;
        true
    }

    /// Error from a write against this view. Items are left untouched.
    pub fn set_error(&mut self, err: &SyncError) {
        self.error = Some(err.to_string());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Provisional local copy after a confirmed write; the next refetch
    /// replaces it.
    pub fn append_provisional(&mut self, item: T) {
        self.items.push(item);
        self.error = None;
    }

    pub fn items_mut(&mut self) -> &mut Vec<T> {
        &mut self.items
    }

    /// View went away: outstanding results will be ignored, data dropped.
    pub fn dispose(&mut self) {
        self.epoch += 1;
        self.items.clear();
        self.error = None;
        self.loaded_once = false;
        self.state = RequestState::Idle;
    }
}
