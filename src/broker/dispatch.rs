//! Dispatch queue — FIFO admission with a single in-flight slot.
//!
//! Mirrors the physical constraint that one browser tab can only process one
//! chat turn at a time: at most one request is ever forwarded to the worker,
//! the rest wait their turn oldest-first.

use std::collections::VecDeque;

use uuid::Uuid;

/// A request as handed to the worker transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedJob {
    pub request_id: Uuid,
    pub payload: String,
    pub model: String,
}

/// FIFO queue plus the one in-flight slot.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    queue: VecDeque<Uuid>,
    in_flight: Option<Uuid>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a request at the back of the queue.
    pub fn enqueue(&mut self, id: Uuid) {
        self.queue.push_back(id);
    }

    /// Pop the oldest queued request into the in-flight slot.
    /// Returns `None` if something is already in flight or the queue is empty.
    pub fn next_ready(&mut self) -> Option<Uuid> {
        if self.in_flight.is_some() {
            return None;
        }
        let id = self.queue.pop_front()?;
        self.in_flight = Some(id);
        Some(id)
    }

    /// Remove a request from the waiting queue (expiry or cancellation while
    /// queued). Returns whether it was present.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.queue.len();
        self.queue.retain(|queued| *queued != id);
        self.queue.len() != before
    }

    /// Put a popped request back at the front, clearing the in-flight slot.
    /// Used when a dispatch attempt fails before the worker saw the job.
    pub fn requeue_front(&mut self, id: Uuid) {
        if self.in_flight == Some(id) {
            self.in_flight = None;
        }
        self.queue.push_front(id);
    }

    pub fn in_flight(&self) -> Option<Uuid> {
        self.in_flight
    }

    /// Free the in-flight slot, returning its occupant.
    pub fn clear_in_flight(&mut self) -> Option<Uuid> {
        self.in_flight.take()
    }

    /// Free the slot only if `id` occupies it.
    pub fn clear_in_flight_if(&mut self, id: Uuid) -> bool {
        if self.in_flight == Some(id) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Queued + in-flight count.
    pub fn pending(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight.is_some())
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
