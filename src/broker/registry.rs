//! Request registry — in-flight request table with single-assignment result slots.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::BrokerError;

/// Terminal outcome of a request, delivered back to the waiting caller.
pub type RequestResult = std::result::Result<String, BrokerError>;

/// Where a registered request currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting in the FIFO queue, not yet handed to the worker.
    Queued,
    /// Forwarded to the worker, awaiting its reply.
    InFlight,
}

/// A caller's outstanding request.
///
/// The oneshot sender is the single-assignment result slot: whoever takes it
/// performs the one and only resolution. The buffered oneshot also means the
/// worker side never blocks on caller consumption.
#[derive(Debug)]
pub struct PendingRequest {
    pub payload: String,
    pub model: String,
    pub created_at: Instant,
    pub deadline: Instant,
    pub state: RequestState,
    slot: Option<oneshot::Sender<RequestResult>>,
}

/// In-memory table of outstanding requests keyed by request id.
///
/// Registration is the only place ids are minted; entries are removed at
/// resolution time, so an absent id means unknown-or-already-resolved.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    entries: HashMap<Uuid, PendingRequest>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request. Mints a fresh id (random, never colliding with
    /// an outstanding one) and returns it together with the receiving half of
    /// the result slot.
    pub fn register(
        &mut self,
        payload: String,
        model: String,
        created_at: Instant,
        deadline: Instant,
    ) -> (Uuid, oneshot::Receiver<RequestResult>) {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            id,
            PendingRequest {
                payload,
                model,
                created_at,
                deadline,
                state: RequestState::Queued,
                slot: Some(tx),
            },
        );
        (id, rx)
    }

    /// Resolve a request with its terminal result.
    ///
    /// Returns true iff this call performed the resolution; false for unknown
    /// or already-resolved ids. Safe to call from racing writers — first one
    /// wins, the rest are no-ops.
    pub fn resolve(&mut self, id: Uuid, result: RequestResult) -> bool {
        let Some(mut entry) = self.entries.remove(&id) else {
            return false;
        };
        if let Some(slot) = entry.slot.take() {
            // A dropped receiver means the caller went away; the request
            // still counts as resolved.
            let _ = slot.send(result);
        }
        true
    }

    /// Resolve with a failure produced by the timeout watcher.
    /// Same idempotency semantics as `resolve`.
    pub fn expire(&mut self, id: Uuid, error: BrokerError) -> bool {
        self.resolve(id, Err(error))
    }

    pub fn get(&self, id: Uuid) -> Option<&PendingRequest> {
        self.entries.get(&id)
    }

    pub fn mark_in_flight(&mut self, id: Uuid) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.state = RequestState::InFlight;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids whose deadline has passed at `now`, with their state and how long
    /// they have been waiting.
    pub fn due(&self, now: Instant) -> Vec<(Uuid, RequestState, Duration)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, e)| (*id, e.state, now.duration_since(e.created_at)))
            .collect()
    }
}
