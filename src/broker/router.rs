//! Worker-message routing — token validation and result correlation.

use tracing::{debug, info};

use crate::error::BrokerError;
use crate::protocol::{ServerFrame, WorkerFrame};

use super::Broker;

/// What routing a worker frame amounted to. Transport adapters map this to
/// their own replies (the poll adapter's HTTP status, a pong frame on the
/// socket).
#[derive(Debug, PartialEq)]
pub enum RouteOutcome {
    /// The frame resolved an outstanding request.
    Resolved,
    /// Unknown or already-resolved request id; duplicate delivery is
    /// tolerated as a no-op.
    Ignored,
    /// The frame arrived on a superseded connection and was discarded.
    /// Expected during reconnection races, not an error.
    Stale,
    /// A ping; the adapter should send this frame back.
    Pong(ServerFrame),
}

impl Broker {
    /// Route an inbound worker frame.
    ///
    /// Validates `token` against the active connection first: a stale
    /// connection's frames never resolve anything. Any accepted frame counts
    /// as liveness. After the in-flight request resolves, the next queued
    /// request is dispatched.
    pub async fn on_worker_message(&self, token: u64, frame: WorkerFrame) -> RouteOutcome {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if !state.connections.is_current(token) {
            debug!(token, "Frame from stale connection discarded");
            return RouteOutcome::Stale;
        }
        state.connections.heartbeat(token, now);

        match frame {
            WorkerFrame::Ping => RouteOutcome::Pong(ServerFrame::pong()),

            WorkerFrame::Response {
                request_id,
                response,
                error,
            } => {
                let outcome = match (error, response) {
                    (Some(message), _) => Err(BrokerError::WorkerReported(message)),
                    (None, Some(text)) if !text.is_empty() => Ok(text),
                    // The worker acknowledged the request but produced
                    // nothing usable.
                    _ => Err(BrokerError::WorkerReported(
                        "empty response from worker".into(),
                    )),
                };

                let was_in_flight = state.dispatch.clear_in_flight_if(request_id);
                state.dispatch.remove(request_id);

                if state.registry.resolve(request_id, outcome) {
                    info!(request_id = %request_id, was_in_flight, "Request resolved by worker");
                    if was_in_flight {
                        self.pump(&mut state);
                    }
                    RouteOutcome::Resolved
                } else {
                    debug!(
                        request_id = %request_id,
                        "Reply for unknown or already-resolved request ignored"
                    );
                    RouteOutcome::Ignored
                }
            }
        }
    }
}
