//! Request–response correlation broker.
//!
//! Accepts blocking `submit` calls from the client-facing adapter, forwards
//! work to the single attached worker (push or pull transport), and matches
//! the worker's asynchronous replies back to the right caller. All shared
//! state lives behind one mutex; every registry, queue, and connection
//! mutation is linearized through it, and no await happens while it is held.

pub mod connection;
pub mod dispatch;
pub mod registry;
pub mod router;
pub mod watcher;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::BridgeConfig;
use crate::error::BrokerError;

use connection::{ConnectionManager, ConnectionMode};
use dispatch::{DispatchQueue, DispatchedJob};
use registry::RequestRegistry;

/// Handle returned to a push-transport adapter on attach.
///
/// Dropping (or draining to `None`) the job receiver means this session was
/// superseded; the adapter should close its channel.
pub struct WorkerSession {
    pub token: u64,
    pub jobs: mpsc::Receiver<DispatchedJob>,
}

/// Answer to a pull-transport poll: at most one job, plus the token the
/// worker must echo on its response. The token is withheld while a push
/// channel holds the connection, so a stray poller can never speak for it.
#[derive(Debug)]
pub struct PollTurn {
    pub token: Option<u64>,
    pub job: Option<DispatchedJob>,
}

/// Read-only snapshot for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub worker_ready: bool,
    /// Queued + in-flight requests.
    pub pending_requests: usize,
}

#[derive(Debug)]
struct BrokerState {
    registry: RequestRegistry,
    dispatch: DispatchQueue,
    connections: ConnectionManager,
}

/// The broker. Construct once, share via `Arc`.
pub struct Broker {
    config: BridgeConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BrokerState>,
}

impl Broker {
    pub fn new(config: BridgeConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            state: Mutex::new(BrokerState {
                registry: RequestRegistry::new(),
                dispatch: DispatchQueue::new(),
                connections: ConnectionManager::new(),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ── Client-facing API ───────────────────────────────────────────

    /// Submit a payload and wait for the worker's reply.
    ///
    /// Queues the request FIFO; it is forwarded once the worker is attached
    /// and idle. Suspends the calling task until the request reaches a
    /// terminal state. Dropping this future cancels the request.
    pub async fn submit(
        self: &Arc<Self>,
        payload: String,
        model: String,
        timeout: Option<Duration>,
    ) -> Result<String, BrokerError> {
        if payload.is_empty() {
            return Err(BrokerError::InvalidRequest("empty message text".into()));
        }

        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let now = self.clock.now();

        let (id, rx) = {
            let mut state = self.state.lock().await;
            let (id, rx) =
                state
                    .registry
                    .register(payload, model, now, now + timeout);
            state.dispatch.enqueue(id);
            info!(
                request_id = %id,
                timeout_secs = timeout.as_secs(),
                queued = state.dispatch.queued(),
                "Request queued"
            );
            self.pump(&mut state);
            (id, rx)
        };

        let mut guard = CancelGuard {
            broker: Arc::clone(self),
            id,
            armed: true,
        };
        let result = rx.await;
        guard.armed = false;

        // A closed slot without a value can only mean the broker itself went
        // away mid-request; report it as a disconnect.
        result.unwrap_or(Err(BrokerError::WorkerDisconnected))
    }

    /// Explicitly cancel an outstanding request. Behaves like expiry without
    /// waiting for the deadline. Returns whether this call resolved it.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        state.dispatch.remove(id);
        let was_in_flight = state.dispatch.clear_in_flight_if(id);
        let cancelled = state.registry.resolve(id, Err(BrokerError::Cancelled));
        if cancelled {
            info!(request_id = %id, was_in_flight, "Request cancelled");
        }
        if was_in_flight {
            self.pump(&mut state);
        }
        cancelled
    }

    /// Read-only health snapshot: worker readiness and pending request count.
    pub async fn health(&self) -> HealthSnapshot {
        let state = self.state.lock().await;
        HealthSnapshot {
            worker_ready: state.connections.is_ready(),
            pending_requests: state.dispatch.pending(),
        }
    }

    // ── Worker-facing API ───────────────────────────────────────────

    /// Attach a push-transport worker, superseding any prior connection.
    /// Any request in flight on the old channel fails with `WorkerDisconnected`.
    pub async fn attach_push_worker(&self) -> WorkerSession {
        let now = self.clock.now();
        let (tx, rx) = mpsc::channel(self.config.job_buffer);
        let mut state = self.state.lock().await;
        let (token, replaced) = state.connections.attach(ConnectionMode::Push(tx), now);
        if let Some(old) = replaced {
            warn!(old_token = old.token, token, "Worker reattached, superseding previous connection");
            Self::fail_in_flight(&mut state, BrokerError::WorkerDisconnected);
        } else {
            info!(token, "Worker attached (push)");
        }
        self.pump(&mut state);
        WorkerSession { token, jobs: rx }
    }

    /// Handle one poll from a pull-transport worker: refreshes liveness
    /// (attaching on first contact) and hands out at most one job.
    pub async fn poll_next(&self) -> PollTurn {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let token = match state.connections.current().map(|c| c.token) {
            None => {
                let (token, _) = state.connections.attach(ConnectionMode::Poll, now);
                info!(token, "Worker attached (poll)");
                token
            }
            Some(token) => {
                state.connections.heartbeat(token, now);
                token
            }
        };

        // Only a poll-mode connection takes jobs this way. A poll arriving
        // while a push channel is live is treated as liveness noise, and the
        // push channel's token is withheld so the poller cannot post a
        // response under the push worker's generation.
        let pollable = matches!(
            state.connections.current().map(|c| &c.mode),
            Some(ConnectionMode::Poll)
        );
        let job = if pollable {
            self.take_next_job(&mut state)
        } else {
            None
        };

        PollTurn { token: pollable.then_some(token), job }
    }

    /// Record worker liveness without any payload (transport-level ping).
    pub async fn heartbeat(&self, token: u64) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.connections.heartbeat(token, now)
    }

    /// The worker-facing adapter lost its channel.
    ///
    /// A stale token is a no-op (a newer connection already superseded it).
    /// Queued requests stay queued awaiting a re-attach; only the in-flight
    /// one fails.
    pub async fn on_worker_disconnect(&self, token: u64) {
        let mut state = self.state.lock().await;
        if state.connections.detach(token).is_some() {
            info!(token, "Worker disconnected");
            Self::fail_in_flight(&mut state, BrokerError::WorkerDisconnected);
        } else {
            debug!(token, "Disconnect for superseded connection ignored");
        }
    }

    /// Token of the active connection, but only when it is poll-mode. Used
    /// by the pull adapter when the worker omits the token from its response
    /// body; a push worker's token is never handed to the pull transport.
    pub async fn active_poll_token(&self) -> Option<u64> {
        let state = self.state.lock().await;
        state.connections.current().and_then(|c| {
            matches!(c.mode, ConnectionMode::Poll).then_some(c.token)
        })
    }

    // ── Internal ────────────────────────────────────────────────────

    /// Forward the next queued request if the worker is attached, idle, and
    /// push-mode. Pull-mode workers collect jobs on `/poll` instead.
    fn pump(&self, state: &mut MutexGuard<'_, BrokerState>) {
        let Some(connection) = state.connections.current() else {
            return;
        };
        let (token, sender) = match &connection.mode {
            ConnectionMode::Push(tx) => (connection.token, tx.clone()),
            ConnectionMode::Poll => return,
        };
        let Some(job) = self.take_next_job(state) else {
            return;
        };
        let id = job.request_id;
        match sender.try_send(job) {
            Ok(()) => {
                info!(request_id = %id, token, "Request dispatched to worker");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Socket task is gone but nobody told us yet; treat it as a
                // disconnect and re-queue the job for the next attachment.
                warn!(token, "Worker job channel closed, detaching");
                state.dispatch.requeue_front(id);
                state.connections.detach(token);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Single in-flight keeps the buffer near-empty; a full
                // channel means the socket task stopped draining.
                warn!(token, "Worker job channel full, holding request");
                state.dispatch.requeue_front(id);
            }
        }
    }

    /// Pop the next queued request into the in-flight slot and build its job.
    fn take_next_job(&self, state: &mut MutexGuard<'_, BrokerState>) -> Option<DispatchedJob> {
        loop {
            let id = state.dispatch.next_ready()?;
            match state.registry.get(id) {
                Some(entry) => {
                    let job = DispatchedJob {
                        request_id: id,
                        payload: entry.payload.clone(),
                        model: entry.model.clone(),
                    };
                    state.registry.mark_in_flight(id);
                    return Some(job);
                }
                None => {
                    // Queue entry with no registry entry: already resolved
                    // (e.g. cancelled). Skip it.
                    state.dispatch.clear_in_flight_if(id);
                }
            }
        }
    }

    /// Fail whatever is in flight with `error` and free the slot.
    fn fail_in_flight(state: &mut MutexGuard<'_, BrokerState>, error: BrokerError) {
        if let Some(id) = state.dispatch.clear_in_flight() {
            if state.registry.resolve(id, Err(error)) {
                info!(request_id = %id, "In-flight request failed");
            }
        }
    }
}

/// Cancels the request if the `submit` future is dropped before resolution
/// (caller abandoned the call).
struct CancelGuard {
    broker: Arc<Broker>,
    id: Uuid,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            let broker = Arc::clone(&self.broker);
            let id = self.id;
            tokio::spawn(async move {
                broker.cancel(id).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::protocol::WorkerFrame;

    fn test_broker() -> (Arc<Broker>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = BridgeConfig {
            request_timeout: Duration::from_secs(60),
            liveness_window: Duration::from_secs(10),
            ..BridgeConfig::default()
        };
        (Broker::new(config, clock.clone()), clock)
    }

    fn reply(id: Uuid, text: &str) -> WorkerFrame {
        WorkerFrame::Response {
            request_id: id,
            response: Some(text.to_string()),
            error: None,
        }
    }

    async fn spawn_submit(
        broker: &Arc<Broker>,
        payload: &str,
    ) -> tokio::task::JoinHandle<Result<String, BrokerError>> {
        let broker = Arc::clone(broker);
        let payload = payload.to_string();
        let handle =
            tokio::spawn(async move { broker.submit(payload, "gemini-pro".into(), None).await });
        // Let the submit task run up to its await on the result slot.
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle
    }

    #[tokio::test]
    async fn submit_roundtrip_over_push_session() {
        let (broker, _clock) = test_broker();
        let mut session = broker.attach_push_worker().await;

        let handle = spawn_submit(&broker, "ping").await;

        let job = session.jobs.recv().await.unwrap();
        assert_eq!(job.payload, "ping");

        broker
            .on_worker_message(session.token, reply(job.request_id, "pong"))
            .await;

        assert_eq!(handle.await.unwrap(), Ok("pong".into()));
        assert_eq!(broker.health().await.pending_requests, 0);
    }

    #[tokio::test]
    async fn single_in_flight_and_fifo_order() {
        let (broker, _clock) = test_broker();

        // Queue two requests before any worker attaches.
        let first = spawn_submit(&broker, "first").await;
        let second = spawn_submit(&broker, "second").await;
        assert_eq!(broker.health().await.pending_requests, 2);

        let mut session = broker.attach_push_worker().await;

        // Only the oldest is dispatched; the other stays queued.
        let job1 = session.jobs.recv().await.unwrap();
        assert_eq!(job1.payload, "first");
        assert!(session.jobs.try_recv().is_err());

        broker
            .on_worker_message(session.token, reply(job1.request_id, "one"))
            .await;

        let job2 = session.jobs.recv().await.unwrap();
        assert_eq!(job2.payload, "second");
        broker
            .on_worker_message(session.token, reply(job2.request_id, "two"))
            .await;

        assert_eq!(first.await.unwrap(), Ok("one".into()));
        assert_eq!(second.await.unwrap(), Ok("two".into()));
    }

    #[tokio::test]
    async fn stale_token_never_resolves() {
        let (broker, _clock) = test_broker();
        let mut old_session = broker.attach_push_worker().await;

        let handle = spawn_submit(&broker, "ping").await;
        let job = old_session.jobs.recv().await.unwrap();

        // Reattach: old session is superseded, its in-flight request fails.
        let mut new_session = broker.attach_push_worker().await;

        // A late reply on the old token must not resolve anything.
        broker
            .on_worker_message(old_session.token, reply(job.request_id, "late"))
            .await;

        assert_eq!(handle.await.unwrap(), Err(BrokerError::WorkerDisconnected));

        // The new session still works end to end.
        let handle = spawn_submit(&broker, "again").await;
        let job = new_session.jobs.recv().await.unwrap();
        broker
            .on_worker_message(new_session.token, reply(job.request_id, "fresh"))
            .await;
        assert_eq!(handle.await.unwrap(), Ok("fresh".into()));
    }

    #[tokio::test]
    async fn disconnect_fails_in_flight_and_keeps_queue() {
        let (broker, _clock) = test_broker();
        let mut session = broker.attach_push_worker().await;

        let first = spawn_submit(&broker, "first").await;
        let second = spawn_submit(&broker, "second").await;

        let job = session.jobs.recv().await.unwrap();
        assert_eq!(job.payload, "first");

        broker.on_worker_disconnect(session.token).await;
        assert_eq!(first.await.unwrap(), Err(BrokerError::WorkerDisconnected));

        // Queued request survives the disconnect and is dispatched to the
        // next attachment immediately.
        let mut session = broker.attach_push_worker().await;
        let job = session.jobs.recv().await.unwrap();
        assert_eq!(job.payload, "second");
        broker
            .on_worker_message(session.token, reply(job.request_id, "two"))
            .await;
        assert_eq!(second.await.unwrap(), Ok("two".into()));
    }

    #[tokio::test]
    async fn queued_without_worker_expires_as_no_worker_available() {
        let (broker, clock) = test_broker();

        let handle = spawn_submit(&broker, "ping").await;

        clock.advance(Duration::from_secs(61));
        broker.sweep().await;

        assert_eq!(handle.await.unwrap(), Err(BrokerError::NoWorkerAvailable));
        assert_eq!(broker.health().await.pending_requests, 0);
    }

    #[tokio::test]
    async fn in_flight_expires_as_timeout_and_frees_slot() {
        let (broker, clock) = test_broker();
        let mut session = broker.attach_push_worker().await;

        let first = spawn_submit(&broker, "slow").await;
        let job = session.jobs.recv().await.unwrap();
        assert_eq!(job.payload, "slow");

        // Keep the connection alive while the request times out.
        clock.advance(Duration::from_secs(5));
        broker.heartbeat(session.token).await;

        let second = spawn_submit(&broker, "next").await;

        clock.advance(Duration::from_secs(56));
        broker.heartbeat(session.token).await;
        broker.sweep().await;

        match first.await.unwrap() {
            Err(BrokerError::Timeout { waited }) => {
                assert!(waited >= Duration::from_secs(60));
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        // Slot freed: the next request goes out.
        let job = session.jobs.recv().await.unwrap();
        assert_eq!(job.payload, "next");
        broker
            .on_worker_message(session.token, reply(job.request_id, "ok"))
            .await;
        assert_eq!(second.await.unwrap(), Ok("ok".into()));
    }

    #[tokio::test]
    async fn stale_connection_detached_by_sweep() {
        let (broker, clock) = test_broker();
        let mut session = broker.attach_push_worker().await;

        let handle = spawn_submit(&broker, "ping").await;
        let _job = session.jobs.recv().await.unwrap();

        clock.advance(Duration::from_secs(11));
        broker.sweep().await;

        assert_eq!(handle.await.unwrap(), Err(BrokerError::WorkerDisconnected));
        assert!(!broker.health().await.worker_ready);
    }

    #[tokio::test]
    async fn poll_transport_hands_out_one_job() {
        let (broker, _clock) = test_broker();

        // First poll attaches; nothing queued yet.
        let turn = broker.poll_next().await;
        assert!(turn.job.is_none());
        assert!(turn.token.is_some());
        assert!(broker.health().await.worker_ready);

        let first = spawn_submit(&broker, "first").await;
        let _second = spawn_submit(&broker, "second").await;

        let turn = broker.poll_next().await;
        let job = turn.job.unwrap();
        assert_eq!(job.payload, "first");

        // In-flight: the next poll hands out nothing until resolution.
        let turn2 = broker.poll_next().await;
        assert!(turn2.job.is_none());

        broker
            .on_worker_message(turn.token.unwrap(), reply(job.request_id, "one"))
            .await;
        assert_eq!(first.await.unwrap(), Ok("one".into()));

        let turn = broker.poll_next().await;
        assert_eq!(turn.job.unwrap().payload, "second");
    }

    #[tokio::test]
    async fn poll_during_push_session_exposes_no_token() {
        let (broker, _clock) = test_broker();
        let mut session = broker.attach_push_worker().await;

        let handle = spawn_submit(&broker, "ping").await;
        let job = session.jobs.recv().await.unwrap();

        // A stray poll while the push channel is live gets neither the job
        // nor any token it could echo on /response.
        let turn = broker.poll_next().await;
        assert!(turn.job.is_none());
        assert!(turn.token.is_none());
        assert!(broker.active_poll_token().await.is_none());

        // The push channel keeps its connection and resolves as usual.
        broker
            .on_worker_message(session.token, reply(job.request_id, "pong"))
            .await;
        assert_eq!(handle.await.unwrap(), Ok("pong".into()));
    }

    #[tokio::test]
    async fn dropped_job_receiver_detaches_and_requeues() {
        let (broker, _clock) = test_broker();

        // Attach and immediately drop the session: the socket task died
        // before any disconnect was reported.
        let session = broker.attach_push_worker().await;
        drop(session);

        // Dispatch hits the closed channel: the connection is detached and
        // the request stays pending for the next attachment.
        let handle = spawn_submit(&broker, "ping").await;
        let health = broker.health().await;
        assert!(!health.worker_ready);
        assert_eq!(health.pending_requests, 1);

        let mut session = broker.attach_push_worker().await;
        let job = session.jobs.recv().await.unwrap();
        assert_eq!(job.payload, "ping");
        broker
            .on_worker_message(session.token, reply(job.request_id, "pong"))
            .await;
        assert_eq!(handle.await.unwrap(), Ok("pong".into()));
    }

    #[tokio::test]
    async fn dropped_submit_future_cancels_request() {
        let (broker, _clock) = test_broker();

        let handle = spawn_submit(&broker, "abandoned").await;
        assert_eq!(broker.health().await.pending_requests, 1);

        handle.abort();
        let _ = handle.await;
        // The cancel guard spawns cleanup; give it a tick.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(broker.health().await.pending_requests, 0);
    }

    #[tokio::test]
    async fn empty_payload_rejected_before_registration() {
        let (broker, _clock) = test_broker();
        let result = broker.submit(String::new(), "gemini-pro".into(), None).await;
        assert!(matches!(result, Err(BrokerError::InvalidRequest(_))));
        assert_eq!(broker.health().await.pending_requests, 0);
    }

    #[tokio::test]
    async fn worker_error_surfaces_to_caller() {
        let (broker, _clock) = test_broker();
        let mut session = broker.attach_push_worker().await;

        let handle = spawn_submit(&broker, "ping").await;
        let job = session.jobs.recv().await.unwrap();

        broker
            .on_worker_message(
                session.token,
                WorkerFrame::Response {
                    request_id: job.request_id,
                    response: None,
                    error: Some("could not locate input element".into()),
                },
            )
            .await;

        assert_eq!(
            handle.await.unwrap(),
            Err(BrokerError::WorkerReported(
                "could not locate input element".into()
            ))
        );
    }
}
