//! Timeout watcher — the only source of time-based resolution.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::BrokerError;

use super::Broker;
use super::registry::RequestState;

impl Broker {
    /// One sweep: detach a stale connection, then expire every request whose
    /// deadline has passed. A queued request that never reached an attached
    /// worker fails as `NoWorkerAvailable`; everything else times out.
    pub async fn sweep(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if state.connections.is_stale(now, self.config.liveness_window) {
            if let Some(token) = state.connections.current().map(|c| c.token) {
                warn!(token, "Worker connection stale, detaching");
                state.connections.detach(token);
                Self::fail_in_flight(&mut state, BrokerError::WorkerDisconnected);
            }
        }

        let worker_ready = state.connections.is_ready();
        for (id, request_state, waited) in state.registry.due(now) {
            let error = match request_state {
                RequestState::Queued if !worker_ready => BrokerError::NoWorkerAvailable,
                _ => BrokerError::Timeout { waited },
            };
            state.dispatch.remove(id);
            state.dispatch.clear_in_flight_if(id);
            if state.registry.expire(id, error) {
                info!(request_id = %id, ?request_state, waited_secs = waited.as_secs(), "Request expired");
            }
        }

        // Expiring the in-flight request frees the slot for the next one.
        self.pump(&mut state);
    }
}

/// Spawn the background task driving `sweep` on a fixed interval.
pub fn spawn_timeout_watcher(
    broker: Arc<Broker>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            broker.sweep().await;
        }
    })
}
